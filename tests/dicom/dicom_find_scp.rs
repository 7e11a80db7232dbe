mod common;

use common::*;
use dicom_core::VR;
use dicom_dictionary_std::tags;
use dimse::{AttributeSet, DimseStatus};
use tempfile::TempDir;

async fn three_instances(dir: &TempDir) -> pacs_scp::ScpCore {
    let core = core(dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();
    store_all(
        &adapter,
        vec![
            ct_instance("1.2.3.1", "P1", "CT"),
            ct_instance("1.2.3.2", "P2", "MR"),
            ct_instance("1.2.3.3", "P3", "CT"),
        ],
    )
    .await;
    core
}

#[tokio::test]
async fn find_streams_two_matches_then_success() {
    let dir = TempDir::new().unwrap();
    let core = three_instances(&dir).await;
    let adapter = core.default_adapter();

    let identifier = AttributeSet::new()
        .with(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "IMAGE")
        .with(tags::MODALITY, VR::CS, "CT")
        .with(tags::PATIENT_ID, VR::LO, "");
    let responses = run(&adapter, find_request(identifier)).await;

    let statuses: Vec<_> = responses.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![DimseStatus::Pending, DimseStatus::Pending, DimseStatus::Success]
    );
    let first = responses[0].dataset.as_ref().unwrap();
    assert_eq!(first.value(tags::SOP_INSTANCE_UID), Some("1.2.3.1"));
    assert_eq!(first.value(tags::PATIENT_ID), Some("P1"));
    assert_eq!(first.value(tags::QUERY_RETRIEVE_LEVEL), Some("IMAGE"));
    let second = responses[1].dataset.as_ref().unwrap();
    assert_eq!(second.value(tags::SOP_INSTANCE_UID), Some("1.2.3.3"));
    assert!(responses[2].dataset.is_none());
}

#[tokio::test]
async fn wildcard_query_scans_the_catalog() {
    let dir = TempDir::new().unwrap();
    let core = three_instances(&dir).await;
    let adapter = core.default_adapter();

    let identifier = AttributeSet::new()
        .with(tags::PATIENT_ID, VR::LO, "P*")
        .with(tags::PATIENT_NAME, VR::PN, "DOE^*");
    let responses = run(&adapter, find_request(identifier)).await;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses.last().unwrap().status, DimseStatus::Success);
}

#[tokio::test]
async fn no_matches_is_a_plain_success() {
    let dir = TempDir::new().unwrap();
    let core = three_instances(&dir).await;
    let adapter = core.default_adapter();

    let identifier = AttributeSet::new().with(tags::MODALITY, VR::CS, "US");
    let responses = run(&adapter, find_request(identifier)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, DimseStatus::Success);
}

#[tokio::test]
async fn cancelled_find_ends_with_cancel() {
    let dir = TempDir::new().unwrap();
    let core = three_instances(&dir).await;
    let adapter = core.default_adapter();

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let responses = run_with(&adapter, find_request(AttributeSet::new()), cancel).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, DimseStatus::Cancel);
}

#[tokio::test]
async fn non_indexed_attributes_match_and_return() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();
    store_all(
        &adapter,
        vec![
            ct_instance("1.2.3.1", "P1", "CT").with(tags::INSTITUTION_NAME, VR::LO, "GENERAL"),
            ct_instance("1.2.3.2", "P2", "CT").with(tags::INSTITUTION_NAME, VR::LO, "CLINIC"),
        ],
    )
    .await;

    let identifier = AttributeSet::new().with(tags::INSTITUTION_NAME, VR::LO, "GENERAL");
    let responses = run(&adapter, find_request(identifier)).await;
    assert_eq!(responses.len(), 2);
    let matched = responses[0].dataset.as_ref().unwrap();
    assert_eq!(matched.value(tags::SOP_INSTANCE_UID), Some("1.2.3.1"));

    // Requested as a return key only
    let identifier = AttributeSet::new()
        .with(tags::PATIENT_ID, VR::LO, "P2")
        .with(tags::INSTITUTION_NAME, VR::LO, "");
    let responses = run(&adapter, find_request(identifier)).await;
    assert_eq!(responses.len(), 2);
    let matched = responses[0].dataset.as_ref().unwrap();
    assert_eq!(matched.value(tags::INSTITUTION_NAME), Some("CLINIC"));
}
