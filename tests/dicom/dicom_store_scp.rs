mod common;

use common::*;
use dicom_core::VR;
use dicom_dictionary_std::{tags, uids};
use dimse::{status, AttributeSet, DimseStatus};
use tempfile::TempDir;

#[tokio::test]
async fn store_without_sop_instance_uid_is_rejected() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    let dataset = AttributeSet::new()
        .with(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE)
        .with(tags::PATIENT_ID, VR::LO, "P1");
    let responses = run(&adapter, store_request(uids::CT_IMAGE_STORAGE, None, dataset)).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status,
        DimseStatus::Failure(status::INVALID_ARGUMENT_VALUE)
    );
    assert!(responses[0].error_comment.is_some());
    assert_eq!(core.store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn store_then_get_returns_payload() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    store_all(&adapter, vec![ct_instance("1.2.3.1", "P1", "CT")]).await;

    let (instance, payload) = core.store.get("1.2.3.1").await.unwrap().unwrap();
    assert_eq!(instance.sop_class_uid, uids::CT_IMAGE_STORAGE);
    assert_eq!(instance.attributes.value(tags::PATIENT_ID), Some("P1"));
    assert!(payload.starts_with(b"DICM"));
}

#[tokio::test]
async fn duplicate_store_overwrites() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    store_all(&adapter, vec![ct_instance("1.2.3.1", "P1", "CT")]).await;
    store_all(&adapter, vec![ct_instance("1.2.3.1", "P2", "CT")]).await;

    assert_eq!(core.store.len().await.unwrap(), 1);
    let (instance, _) = core.store.get("1.2.3.1").await.unwrap().unwrap();
    assert_eq!(instance.attributes.value(tags::PATIENT_ID), Some("P2"));
}

#[tokio::test]
async fn unsupported_storage_class_is_rejected() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = core.default_adapter();

    let sop_class = "1.2.840.10008.5.1.4.1.1.481.1";
    let dataset = ct_instance("1.2.3.1", "P1", "RTIMAGE");
    let responses = run(&adapter, store_request(sop_class, Some("1.2.3.1"), dataset)).await;

    assert_eq!(
        responses[0].status,
        DimseStatus::Failure(status::UNSUPPORTED_SOP_CLASS)
    );
    assert!(core.store.get("1.2.3.1").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_stores_of_distinct_instances() {
    let dir = TempDir::new().unwrap();
    let core = core(&dir, ScriptedAssociator::default());
    let adapter = std::sync::Arc::new(core.default_adapter());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let adapter = adapter.clone();
        tasks.push(tokio::spawn(async move {
            let uid = format!("1.2.3.{}", i);
            let dataset = ct_instance(&uid, &format!("P{}", i), "CT");
            run(&adapter, store_request(uids::CT_IMAGE_STORAGE, Some(&uid), dataset)).await
        }));
    }
    for task in tasks {
        let responses = task.await.unwrap();
        assert_eq!(responses[0].status, DimseStatus::Success);
    }

    assert_eq!(core.store.len().await.unwrap(), 8);
    for i in 0..8 {
        let (instance, _) = core
            .store
            .get(&format!("1.2.3.{}", i))
            .await
            .unwrap()
            .unwrap();
        let expected = format!("P{}", i);
        assert_eq!(instance.attributes.value(tags::PATIENT_ID), Some(expected.as_str()));
    }
}
