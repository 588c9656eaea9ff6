//! End-to-end tests for the queue, crash bookkeeping and the two-pass render.
//!
//! Every test runs against a scratch project folder and a scripted host, so
//! nothing here touches a real renderer.

mod common;

use std::sync::atomic::Ordering;

use community_render::config::ProjectConfig;
use community_render::error::PipelineError;
use community_render::host::{Caption, Resolution};
use community_render::qc::tags;
use community_render::queue::{QueueFilter, QueueStatus};
use community_render::render::{RenderOrchestrator, RenderOutcome, RenderTimer, RunMode, TimerAction};
use community_render::session::Session;

use common::{Project, ScriptedHost};

// ===========================================================================
// Queue construction
// ===========================================================================

#[test]
fn test_rebuild_merges_registry() {
    let project = Project::new();
    project.registry(&["1\tjane@x.org\tJane Doe\tUS\tsample.glb\t"]);
    project.submit("sample.glb", "subject");

    let session = project.open(ScriptedHost::new());
    let row = session.row(0).unwrap();
    assert_eq!(session.queue().len(), 1);
    assert_eq!(row.user_name, "Jane Doe");
    assert_eq!(row.country, "US");
    assert!(row.has_form_match);
    assert!(!row.render_exists);
    assert!(row.qc.is_empty());
}

#[test]
fn test_rebuild_is_deterministic() {
    let project = Project::new();
    for name in ["c.glb", "a.obj", "b.gltf", "notes.txt"] {
        project.submit(name, "subject");
    }

    let mut session = project.open(ScriptedHost::new());
    let first: Vec<String> = session.queue().rows().iter().map(|r| r.source_file.clone()).collect();
    session.rebuild(QueueFilter::All).unwrap();
    let second: Vec<String> = session.queue().rows().iter().map(|r| r.source_file.clone()).collect();

    assert_eq!(first, vec!["a.obj", "b.gltf", "c.glb"]);
    assert_eq!(first, second);
    assert_eq!(session.stats().non_source_files, 1);
    assert_eq!(session.stats().no_form_match, 3);
}

#[test]
fn test_missing_source_folder_is_config_error() {
    let project = Project::new();
    std::fs::remove_dir_all(&project.paths.source_folder).unwrap();

    let result = Session::open(
        project.paths.clone(),
        ProjectConfig::default(),
        ScriptedHost::new(),
        QueueFilter::All,
    );
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[test]
fn test_failed_rebuild_keeps_previous_queue() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());

    std::fs::remove_dir_all(&project.paths.source_folder).unwrap();
    assert!(session.rebuild(QueueFilter::All).is_err());
    assert_eq!(session.queue().len(), 1);
}

#[test]
fn test_superseded_entry_flagged_not_latest() {
    let project = Project::new();
    project.registry(&[
        "1\tjane@x.org\tJane\tUS\told.glb\t",
        "2\tjane@x.org\tJane\tUS\tnew.glb\t",
    ]);
    project.submit("old.glb", "subject");
    project.submit("new.glb", "subject");

    let mut session = project.open(ScriptedHost::new());
    let old = session.queue().position("old.glb").unwrap();
    assert!(session.row(old).unwrap().qc.contains(tags::NOT_LATEST));

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!(summary.rendered, 1);
    assert_eq!(session.row(old).unwrap().status, QueueStatus::Skip);
}

#[test]
fn test_not_latest_stays_off_disk() {
    let project = Project::new();
    project.registry(&[
        "1\tjane@x.org\tJane\tUS\told.glb\t",
        "2\tjane@x.org\tJane\tUS\tnew.glb\t",
    ]);
    project.submit("old.glb", "empty");
    project.submit("new.glb", "subject");

    let mut session = project.open(ScriptedHost::new());
    let old = session.queue().position("old.glb").unwrap();
    session.set_active(old).unwrap();

    let row = session.row(old).unwrap();
    assert!(row.qc.contains(tags::NOT_LATEST));
    assert!(row.qc.contains(tags::NO_BASE_MESH));
    assert_eq!(project.read_qc("old.glb").as_deref(), Some(tags::NO_BASE_MESH));

    // Once the registry no longer supersedes the row, the tag is gone.
    project.registry(&["1\tjane@x.org\tJane\tUS\told.glb\t"]);
    session.reload().unwrap();
    let old = session.queue().position("old.glb").unwrap();
    assert!(!session.row(old).unwrap().qc.contains(tags::NOT_LATEST));
}

#[test]
fn test_stale_not_latest_on_disk_is_ignored() {
    let project = Project::new();
    project.registry(&["1\tjane@x.org\tJane\tUS\tsample.glb\t"]);
    project.submit("sample.glb", "subject");
    project.write_qc("sample.glb", "not_latest_entry");

    let mut session = project.open(ScriptedHost::new());
    assert!(session.row(0).unwrap().qc.is_empty());

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!(summary.rendered, 1);
}

// ===========================================================================
// Rendering
// ===========================================================================

#[test]
fn test_end_to_end_single_submission() {
    let project = Project::new();
    project.registry(&["1\tjane@x.org\tJane Doe\tus\tsample.glb\t"]);
    project.submit("sample.glb", "subject");
    let mut session = project.open(ScriptedHost::watching(&project));

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();

    assert_eq!(summary.rendered, 1);
    let row = session.row(0).unwrap();
    assert!(row.render_exists);
    assert_eq!(row.status, QueueStatus::Done);
    assert!(project.paths.full_render_dir().join("sample.png").is_file());
    assert!(project.paths.small_render_dir().join("sample.png").is_file());
    assert!(!project.paths.crash_marker().exists());

    let calls = &session.host().calls;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].resolution, Resolution::square(100));
    assert!(calls[0].caption.is_none());
    assert_eq!(calls[1].resolution, Resolution::new(640, 480));
    assert_eq!(
        calls[1].caption,
        Some(Caption {
            author: "Jane Doe".into(),
            country: "US".into(),
        })
    );
    assert!(calls.iter().all(|c| c.had_scene));
    assert!(calls.iter().all(|c| c.marker.as_deref() == Some("sample.glb")));
}

#[test]
fn test_resolution_restored_after_thumbnail() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut host = ScriptedHost::new();
    host.fail_full = true;
    let mut session = project.open(host);

    RenderOrchestrator::new().render_all(&mut session).unwrap();

    assert_eq!(session.host().resolution, Resolution::new(640, 480));
}

#[test]
fn test_thumbnail_alone_does_not_complete_row() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut host = ScriptedHost::new();
    host.fail_full = true;
    let mut session = project.open(host);

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!(summary.skipped, 1);
    let row = session.row(0).unwrap();
    assert_eq!(row.status, QueueStatus::Skip);
    assert!(!row.render_exists);
    assert!(project.paths.small_render_dir().join("a.png").is_file());
    assert!(!project.paths.crash_marker().exists());
}

#[test]
fn test_render_exists_flips_when_file_removed() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert!(session.row(0).unwrap().render_exists);

    std::fs::remove_file(project.paths.small_render_dir().join("a.png")).unwrap();
    assert!(!session.refresh_render_exists(0));
}

#[test]
fn test_rendered_rows_are_not_requeued() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    RenderOrchestrator::new().render_all(&mut session).unwrap();

    session.rebuild(QueueFilter::MissingOnly).unwrap();
    assert!(session.queue().is_empty());

    session.rebuild(QueueFilter::All).unwrap();
    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!(summary.rendered, 0);
    assert_eq!(session.host().calls.len(), 2);
}

#[test]
fn test_no_subject_skipped_in_batch_rendered_interactively() {
    let project = Project::new();
    project.submit("camera.glb", "empty");
    let mut session = project.open(ScriptedHost::new());

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!((summary.rendered, summary.skipped), (0, 1));
    assert!(session.row(0).unwrap().qc.contains(tags::NO_BASE_MESH));
    assert_eq!(project.read_qc("camera.glb").as_deref(), Some(tags::NO_BASE_MESH));
    assert!(session.host().calls.is_empty());

    let outcome = RenderOrchestrator::new().render_current(&mut session).unwrap();
    assert_eq!(outcome, RenderOutcome::Rendered { index: 0, exists: true });
}

#[test]
fn test_render_current_ignores_disqualifying_tags() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.submit("b.glb", "subject");
    project.write_qc("a.glb", "Skip_me");
    project.write_qc("b.glb", "crashed:5");
    let mut session = project.open(ScriptedHost::new());
    let mut orchestrator = RenderOrchestrator::new();

    for index in 0..2 {
        session.set_active(index).unwrap();
        let outcome = orchestrator.render_current(&mut session).unwrap();
        assert_eq!(outcome, RenderOutcome::Rendered { index, exists: true });
        assert_eq!(session.row(index).unwrap().status, QueueStatus::Done);
    }
    assert!(!orchestrator.is_running());
}

#[test]
fn test_load_failure_tags_and_continues() {
    let project = Project::new();
    project.submit("a.glb", "broken");
    project.submit("b.glb", "subject");
    let mut session = project.open(ScriptedHost::new());

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();

    assert_eq!((summary.rendered, summary.skipped), (1, 1));
    assert!(session.row(0).unwrap().qc.contains(tags::LOAD_FAILED));
    assert_eq!(session.row(0).unwrap().status, QueueStatus::Skip);
    assert_eq!(session.row(1).unwrap().status, QueueStatus::Done);
    assert!(!project.paths.crash_marker().exists());
}

#[test]
fn test_stop_flag_observed_between_items() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.submit("b.glb", "subject");
    let mut orchestrator = RenderOrchestrator::new();
    let mut host = ScriptedHost::new();
    host.stop_after_first = Some(orchestrator.stop_handle());
    let mut session = project.open(host);

    let summary = orchestrator.render_all(&mut session).unwrap();

    assert_eq!(summary.rendered, 1);
    assert_eq!(session.row(0).unwrap().status, QueueStatus::Done);
    assert_eq!(session.row(1).unwrap().status, QueueStatus::Ready);
    assert!(!orchestrator.stop_handle().load(Ordering::SeqCst));
}

#[test]
fn test_timer_rearms_until_exhausted() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.submit("b.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    let mut orchestrator = RenderOrchestrator::new();

    let mut timer = RenderTimer::start(&mut orchestrator, &mut session);
    let mut actions = Vec::new();
    loop {
        let action = timer.tick(&mut orchestrator, &mut session).unwrap();
        actions.push(action);
        if action == TimerAction::Finished {
            break;
        }
    }

    assert_eq!(
        actions,
        vec![
            TimerAction::Rearm(std::time::Duration::ZERO),
            TimerAction::Rearm(std::time::Duration::ZERO),
            TimerAction::Finished,
        ]
    );
    assert_eq!(timer.summary().rendered, 2);
    assert!(!orchestrator.is_running());
}

#[test]
fn test_timer_stops_when_cancelled() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    let mut orchestrator = RenderOrchestrator::new();

    let mut timer = RenderTimer::start(&mut orchestrator, &mut session);
    orchestrator.stop();
    assert_eq!(timer.tick(&mut orchestrator, &mut session).unwrap(), TimerAction::Finished);
    assert_eq!(timer.summary().rendered, 0);
}

#[test]
fn test_single_mode_renders_one_row() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.submit("b.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    session.queue_mut().queue_all();

    let summary = RenderOrchestrator::new()
        .run_queue(&mut session, RunMode::Single)
        .unwrap();

    assert_eq!(summary.rendered, 1);
    assert_eq!(session.row(1).unwrap().status, QueueStatus::Ready);
}

#[test]
fn test_caption_hidden_when_text_disabled() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let config = ProjectConfig {
        use_text: false,
        ..ProjectConfig::default()
    };
    let mut session = project.open_with(config, ScriptedHost::new());

    RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert!(session.host().calls.iter().all(|c| c.caption.is_none()));
}

// ===========================================================================
// Crash bookkeeping
// ===========================================================================

#[test]
fn test_crash_marker_recovered_on_open() {
    let project = Project::new();
    project.submit("a.glb", "subject");

    project.arm_crash_marker("a.glb");
    let session = project.open(ScriptedHost::new());
    assert_eq!(session.row(0).unwrap().qc.count(tags::CRASHED), 1);
    assert!(!project.paths.crash_marker().exists());
    drop(session);

    project.arm_crash_marker("a.glb");
    let session = project.open(ScriptedHost::new());
    assert_eq!(session.row(0).unwrap().qc.count(tags::CRASHED), 2);
    assert_eq!(project.read_qc("a.glb").as_deref(), Some("crashed:2"));
}

#[test]
fn test_crashed_row_retried_below_ceiling() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.write_qc("a.glb", "crashed:2");
    let mut session = project.open(ScriptedHost::new());

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();
    assert_eq!(summary.rendered, 1);
}

#[test]
fn test_crash_ceiling_skips_row() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.submit("b.glb", "subject");
    project.write_qc("a.glb", "crashed:3");
    let mut session = project.open(ScriptedHost::new());

    let summary = RenderOrchestrator::new().render_all(&mut session).unwrap();

    assert_eq!(summary.rendered, 1);
    assert_eq!(session.row(0).unwrap().status, QueueStatus::Skip);
    assert!(session.host().calls.iter().all(|c| !c.output.ends_with("a.png")));
}

#[test]
fn test_operator_skip_tag_honoured() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    session.set_qc(0, "Skip_me").unwrap();

    session.queue_mut().queue_only(0);
    let outcome = RenderOrchestrator::new().render_one(&mut session, true).unwrap();
    assert_eq!(outcome, RenderOutcome::QueueEmpty);
    assert_eq!(session.row(0).unwrap().status, QueueStatus::Skip);
}

// ===========================================================================
// Operator actions
// ===========================================================================

#[test]
fn test_set_active_normalizes_subject() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());

    let activation = session.set_active(7).unwrap();

    assert_eq!(activation.index, 0);
    let report = activation.report.unwrap();
    assert!(report.tags.is_empty());
    assert!((report.planar_size - 1.5).abs() < 1e-4);
    assert!((report.scale - 1.0 / 1.5).abs() < 1e-4);
    let scene = session.workspace().scene().unwrap();
    assert_eq!(scene.object(report.subject.unwrap()).name, "Body");
    assert_eq!(session.workspace().placeholder().name, "a");
}

#[test]
fn test_load_original_skips_normalization() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let config = ProjectConfig {
        load_original: true,
        ..ProjectConfig::default()
    };
    let mut session = project.open_with(config, ScriptedHost::new());

    let activation = session.set_active(0).unwrap();
    assert!(activation.report.is_none());
    assert!(session.workspace().subject().is_none());
}

#[test]
fn test_missing_source_file_is_not_found() {
    let project = Project::new();
    let path = project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    std::fs::remove_file(path).unwrap();

    let err = session.set_active(0).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert!(session.row(0).unwrap().qc.is_empty());
}

#[test]
fn test_navigation_wraps() {
    let project = Project::new();
    for name in ["a.glb", "b.glb", "c.glb"] {
        project.submit(name, "subject");
    }
    let mut session = project.open(ScriptedHost::new());

    assert_eq!(session.open_previous().unwrap().index, 2);
    assert_eq!(session.open_next().unwrap().index, 0);
    assert_eq!(session.open_next().unwrap().index, 1);
    let random = session.open_random().unwrap().index;
    assert!(random < 3);
}

#[test]
fn test_empty_queue_navigation() {
    let project = Project::new();
    let mut session = project.open(ScriptedHost::new());
    assert!(matches!(session.open_next(), Err(PipelineError::EmptyQueue)));
    assert!(matches!(session.set_active(0), Err(PipelineError::EmptyQueue)));
}

#[test]
fn test_reload_keeps_cursor_on_same_file() {
    let project = Project::new();
    project.submit("b.glb", "subject");
    project.submit("c.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    session.set_active(1).unwrap();

    project.submit("a.glb", "subject");
    session.reload().unwrap();

    let cursor = session.queue().cursor();
    assert_eq!(session.row(cursor).unwrap().source_file, "c.glb");
}

#[test]
fn test_delete_render_removes_both_files() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    let mut session = project.open(ScriptedHost::new());
    RenderOrchestrator::new().render_all(&mut session).unwrap();

    session.delete_render(0).unwrap();

    assert!(!session.row(0).unwrap().render_exists);
    assert!(!project.paths.full_render_dir().join("a.png").exists());
    assert!(!project.paths.small_render_dir().join("a.png").exists());
    session.delete_render(0).unwrap();
}

#[test]
fn test_set_qc_replaces_and_clears() {
    let project = Project::new();
    project.submit("a.glb", "subject");
    project.write_qc("a.glb", "crashed:1;no_base_mesh");
    let mut session = project.open(ScriptedHost::new());

    session.set_qc(0, "skip").unwrap();
    assert_eq!(project.read_qc("a.glb").as_deref(), Some("skip"));

    session.set_qc(0, "").unwrap();
    assert!(project.read_qc("a.glb").is_none());
    assert!(session.row(0).unwrap().qc.is_empty());
}
