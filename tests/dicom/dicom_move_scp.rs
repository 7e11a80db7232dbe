mod common;

use std::sync::atomic::Ordering;

use common::*;
use dicom_core::VR;
use dicom_dictionary_std::tags;
use dimse::{
    status, AttributeSet, DimseStatus, SubOperationCounts, SubOperationOutcome, TransferError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn counts(remaining: u32, completed: u32, failed: u32, warning: u32) -> SubOperationCounts {
    SubOperationCounts {
        remaining,
        completed,
        failed,
        warning,
    }
}

fn ct_study() -> AttributeSet {
    AttributeSet::new()
        .with(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "STUDY")
        .with(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.826.0.1.1")
}

async fn with_three_instances(dir: &TempDir, associator: ScriptedAssociator) -> pacs_scp::ScpCore {
    let core = core(dir, associator);
    store_all(
        &core.default_adapter(),
        vec![
            ct_instance("1.2.3.1", "P1", "CT"),
            ct_instance("1.2.3.2", "P1", "CT"),
            ct_instance("1.2.3.3", "P1", "CT"),
        ],
    )
    .await;
    core
}

#[tokio::test]
async fn failed_sub_operation_yields_warning() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::new(vec![
        Ok(SubOperationOutcome::Completed),
        Err(TransferError::Rejected(0xA700, "out of resources".to_string())),
        Ok(SubOperationOutcome::Completed),
    ]);
    let core = with_three_instances(&dir, associator.clone()).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    let progress: Vec<_> = responses
        .iter()
        .filter(|r| r.status == DimseStatus::Pending)
        .map(|r| r.sub_operations.unwrap())
        .collect();
    assert_eq!(
        progress,
        vec![counts(2, 1, 0, 0), counts(1, 1, 1, 0), counts(0, 2, 1, 0)]
    );

    let last = responses.last().unwrap();
    assert_eq!(last.status, DimseStatus::Warning(status::WARNING));
    assert_eq!(last.sub_operations, Some(counts(0, 2, 1, 0)));

    assert_eq!(associator.sent_uids(), vec!["1.2.3.1", "1.2.3.2", "1.2.3.3"]);
    assert_eq!(associator.connects.load(Ordering::SeqCst), 1);
    assert_eq!(associator.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sub_operations_carry_the_move_originator() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::default();
    let core = with_three_instances(&dir, associator.clone()).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    assert_eq!(responses.last().unwrap().status, DimseStatus::Success);
    let sent = associator.sent.lock().unwrap();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|op| op.move_originator_aet == CALLING_AET));
    assert!(sent.iter().all(|op| op.move_originator_message_id == Some(9)));
    assert!(sent.iter().all(|op| op.payload.starts_with(b"DICM")));
}

#[tokio::test]
async fn unknown_destination_is_rejected() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::default();
    let core = with_three_instances(&dir, associator.clone()).await;

    let responses = run(&core.default_adapter(), move_request("NOWHERE", ct_study())).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status,
        DimseStatus::Failure(status::MOVE_DESTINATION_UNKNOWN)
    );
    assert_eq!(associator.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_matches_completes_without_connecting() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::default();
    let core = with_three_instances(&dir, associator.clone()).await;

    let identifier = AttributeSet::new()
        .with(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "STUDY")
        .with(tags::STUDY_INSTANCE_UID, VR::UI, "9.9.9");
    let responses = run(&core.default_adapter(), move_request(DESTINATION, identifier)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, DimseStatus::Success);
    assert_eq!(responses[0].sub_operations, Some(counts(0, 0, 0, 0)));
    assert_eq!(associator.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lost_association_freezes_counters() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::new(vec![
        Ok(SubOperationOutcome::Completed),
        Err(TransferError::AssociationLost("connection reset".to_string())),
    ]);
    let core = with_three_instances(&dir, associator.clone()).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    let last = responses.last().unwrap();
    assert_eq!(last.status, DimseStatus::Failure(status::UNABLE_TO_PROCESS));
    assert_eq!(last.sub_operations, Some(counts(1, 1, 1, 0)));
    assert_eq!(associator.sent_uids(), vec!["1.2.3.1", "1.2.3.2"]);
    // A lost association is not released
    assert_eq!(associator.releases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_destination_is_unable_to_process() {
    let dir = TempDir::new().unwrap();
    let core = with_three_instances(&dir, ScriptedAssociator::refusing()).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status,
        DimseStatus::Failure(status::UNABLE_TO_PROCESS)
    );
    assert_eq!(responses[0].sub_operations, Some(counts(3, 0, 0, 0)));
}

#[tokio::test]
async fn all_sub_operations_failing() {
    let dir = TempDir::new().unwrap();
    let rejected = || Err(TransferError::Rejected(0xA700, "out of resources".to_string()));
    let associator = ScriptedAssociator::new(vec![rejected(), rejected(), rejected()]);
    let core = with_three_instances(&dir, associator).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    let last = responses.last().unwrap();
    assert_eq!(
        last.status,
        DimseStatus::Failure(status::UNABLE_TO_PERFORM_SUB_OPERATIONS)
    );
    assert_eq!(last.sub_operations, Some(counts(0, 0, 3, 0)));
}

#[tokio::test]
async fn sub_operation_warnings_are_counted() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::new(vec![
        Ok(SubOperationOutcome::Completed),
        Ok(SubOperationOutcome::Warning(0xB007)),
    ]);
    let core = with_three_instances(&dir, associator).await;

    let responses = run(&core.default_adapter(), move_request(DESTINATION, ct_study())).await;

    let last = responses.last().unwrap();
    assert_eq!(last.status, DimseStatus::Warning(status::WARNING));
    assert_eq!(last.sub_operations, Some(counts(0, 2, 0, 1)));
}

#[tokio::test]
async fn cancelled_move_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let associator = ScriptedAssociator::default();
    let core = with_three_instances(&dir, associator.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let responses = run_with(
        &core.default_adapter(),
        move_request(DESTINATION, ct_study()),
        cancel,
    )
    .await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, DimseStatus::Cancel);
    assert!(associator.sent_uids().is_empty());
}

#[tokio::test]
async fn cancel_between_sub_operations_keeps_partial_counts() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let associator = ScriptedAssociator::default().cancel_after(2, cancel.clone());
    let core = with_three_instances(&dir, associator.clone()).await;

    let responses = run_with(
        &core.default_adapter(),
        move_request(DESTINATION, ct_study()),
        cancel,
    )
    .await;

    let statuses: Vec<_> = responses.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![DimseStatus::Pending, DimseStatus::Cancel]);
    assert_eq!(responses[0].sub_operations, Some(counts(2, 1, 0, 0)));
    assert_eq!(responses[1].sub_operations, Some(counts(1, 2, 0, 0)));
    assert_eq!(associator.sent_uids(), vec!["1.2.3.1", "1.2.3.2"]);
    assert_eq!(associator.releases.load(Ordering::SeqCst), 1);
}
