mod common;

use common::*;
use dicom_core::VR;
use dicom_dictionary_std::{tags, uids};
use dimse::{AttributeSet, DimseCommand, DimseRequest, DimseStatus, PeerIdentity};
use tempfile::TempDir;

#[tokio::test]
async fn store_then_query_by_modality() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    let dataset = AttributeSet::new()
        .with(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE)
        .with(tags::SOP_INSTANCE_UID, VR::UI, "1.1")
        .with(tags::MODALITY, VR::CS, "CT");
    let stored = run(
        &adapter,
        store_request(uids::CT_IMAGE_STORAGE, Some("1.1"), dataset),
    )
    .await;
    assert_eq!(stored[0].status, DimseStatus::Success);

    let identifier = AttributeSet::new().with(tags::MODALITY, VR::CS, "CT");
    let responses = run(&adapter, find_request(identifier)).await;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status, DimseStatus::Pending);
    let matched = responses[0].dataset.as_ref().unwrap();
    assert_eq!(matched.value(tags::SOP_INSTANCE_UID), Some("1.1"));
    assert_eq!(matched.value(tags::SOP_CLASS_UID), Some(uids::CT_IMAGE_STORAGE));
    assert_eq!(matched.value(tags::MODALITY), Some("CT"));
    assert_eq!(responses[1].status, DimseStatus::Success);
}

#[tokio::test]
async fn echo_round_trip() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    let request = DimseRequest::new(
        PeerIdentity::new(CALLING_AET, "PACS_SCP"),
        uids::VERIFICATION,
        DimseCommand::Echo.command_set(1, uids::VERIFICATION),
    );
    let responses = run(&adapter, request).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, DimseStatus::Success);
}

#[tokio::test]
async fn response_command_sets_echo_the_request() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();
    store_all(&adapter, vec![ct_instance("1.2.3.1", "P1", "CT")]).await;

    let identifier = AttributeSet::new().with(tags::PATIENT_ID, VR::LO, "P1");
    let responses = run(&adapter, find_request(identifier.clone())).await;
    let request = find_request(identifier);

    let pending = responses[0].command_set(&request);
    assert_eq!(pending.value(tags::MESSAGE_ID_BEING_RESPONDED_TO), Some("3"));
    assert_eq!(pending.value(tags::STATUS), Some("65280"));
    assert_eq!(pending.value(tags::COMMAND_DATA_SET_TYPE), Some("0"));
    assert_eq!(
        pending.value(tags::COMMAND_FIELD),
        Some(DimseCommand::Find.response_field().to_string().as_str())
    );

    let last = responses.last().unwrap().command_set(&request);
    assert_eq!(last.value(tags::STATUS), Some("0"));
    assert_eq!(last.value(tags::COMMAND_DATA_SET_TYPE), Some("257"));
}

#[tokio::test]
async fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let core = core(&dir, ScriptedAssociator::default());
        store_all(&core.default_adapter(), vec![ct_instance("1.2.3.1", "P1", "CT")]).await;
    }

    let core = core(&dir, ScriptedAssociator::default());
    let identifier = AttributeSet::new().with(tags::PATIENT_ID, VR::LO, "P1");
    let responses = run(&core.default_adapter(), find_request(identifier)).await;

    assert_eq!(responses.len(), 2);
    assert_eq!(
        responses[0].dataset.as_ref().unwrap().value(tags::SOP_INSTANCE_UID),
        Some("1.2.3.1")
    );
}
