//! C-STORE Adapter (`spec.md` §4.1, §6 "DICOM SCP").
//!
//! Accepts associations, answers C-ECHO, and for each C-STORE parses the
//! inbound PDV stream into a dataset, attaches file-meta, and hands it to
//! `StorageManager::save_temp_dicom_object` followed by `process_image`,
//! then maps the outcome to a DICOM status code. Grounded in the
//! accept-loop and PDU-handling shape previously carried in
//! `storescp/mod.rs::run` and `storescp/store_async.rs::run_store_async` —
//! the per-study sleep-task completion detection from that source is
//! intentionally not carried over; quiescence detection belongs to
//! [`crate::completion::CompletionTracker`] instead.

mod sop_classes;

use std::sync::Arc;

use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject, StandardDataDictionary};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::{
    association::ServerAssociationOptions,
    pdu::{PDataValue, PDataValueType},
    Pdu,
};
use snafu::{OptionExt, Report, ResultExt, Whatever};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DicomServerConfig;
use crate::storage::StorageManager;

/// Minimum SOP classes advertised besides Verification (`spec.md` §4.1).
const DEFAULT_STORAGE_SOP_CLASSES: &[&str] = &[
    dicom_dictionary_std::uids::CT_IMAGE_STORAGE,
    dicom_dictionary_std::uids::MR_IMAGE_STORAGE,
    dicom_dictionary_std::uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
];

const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_PROCESSING_FAILURE: u16 = 0xC000;
const STATUS_OUT_OF_RESOURCES: u16 = 0x0106;

pub struct ScpServer {
    storage: Arc<StorageManager>,
    ip: String,
    port: u16,
    ae_title: String,
    abstract_syntaxes: Vec<String>,
}

impl ScpServer {
    pub fn new(storage: Arc<StorageManager>, config: &DicomServerConfig) -> Self {
        let mut abstract_syntaxes: Vec<String> = vec![dicom_dictionary_std::uids::VERIFICATION.to_string()];
        abstract_syntaxes.extend(DEFAULT_STORAGE_SOP_CLASSES.iter().map(|s| s.to_string()));
        for name in &config.sop_classes {
            if let Some(uid) = sop_classes::map_sop_class_name(name) {
                abstract_syntaxes.push(uid.to_string());
            } else {
                abstract_syntaxes.push(name.clone());
            }
        }
        abstract_syntaxes.sort();
        abstract_syntaxes.dedup();

        ScpServer {
            storage,
            ip: config.ip.clone(),
            port: config.port,
            ae_title: config.ae_title.clone(),
            abstract_syntaxes,
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.ip.as_str(), self.port)).await?;
        info!(ip = %self.ip, port = self.port, ae_title = %self.ae_title, "DICOM SCP listening");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("DICOM SCP shutting down");
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(error) => {
                            warn!(%error, "failed to accept connection");
                            continue;
                        }
                    };
                    let storage = self.storage.clone();
                    let ae_title = self.ae_title.clone();
                    let abstract_syntaxes = self.abstract_syntaxes.clone();
                    let mut conn_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = conn_shutdown.changed() => {
                                debug!(%peer, "dropping connection for shutdown");
                            }
                            result = handle_association(socket, storage, ae_title, abstract_syntaxes) => {
                                if let Err(error) = result {
                                    warn!(%peer, "{}", Report::from_error(error));
                                }
                            }
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

async fn handle_association(
    stream: TcpStream,
    storage: Arc<StorageManager>,
    ae_title: String,
    abstract_syntaxes: Vec<String>,
) -> Result<(), Whatever> {
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(&ae_title)
        .strict(false)
        .promiscuous(false);

    for uid in &abstract_syntaxes {
        options = options.with_abstract_syntax(uid.clone());
    }
    for ts in TransferSyntaxRegistry.iter() {
        if !ts.is_unsupported() {
            options = options.with_transfer_syntax(ts.uid());
        }
    }

    let mut association = options
        .establish_async(stream)
        .await
        .whatever_context("could not establish association")?;

    info!(client = %association.client_ae_title(), "association established");

    let mut instance_buffer: Vec<u8> = Vec::with_capacity(1024 * 1024);
    let mut message_id: u16 = 1;
    let mut sop_class_uid = String::new();
    let mut sop_instance_uid = String::new();

    loop {
        match association.receive().await {
            Ok(Pdu::PData { data }) => {
                for data_value in data {
                    handle_pdata_value(
                        data_value,
                        &mut instance_buffer,
                        &mut message_id,
                        &mut sop_class_uid,
                        &mut sop_instance_uid,
                        &storage,
                        &mut association,
                    )
                    .await?;
                }
            }
            Ok(Pdu::ReleaseRQ) => {
                association.send(&Pdu::ReleaseRP).await.unwrap_or_else(|error| {
                    warn!("failed to send release response: {}", Report::from_error(error));
                });
                info!(client = %association.client_ae_title(), "association released");
                break;
            }
            Ok(Pdu::AbortRQ { source }) => {
                warn!("association aborted by peer: {:?}", source);
                break;
            }
            Ok(_) => {}
            Err(error) => {
                debug!("{}", Report::from_error(error));
                break;
            }
        }
    }

    Ok(())
}

async fn handle_pdata_value(
    mut data_value: PDataValue,
    instance_buffer: &mut Vec<u8>,
    message_id: &mut u16,
    sop_class_uid: &mut String,
    sop_instance_uid: &mut String,
    storage: &Arc<StorageManager>,
    association: &mut dicom_ul::association::ServerAssociation<TcpStream>,
) -> Result<(), Whatever> {
    if data_value.value_type == PDataValueType::Data && !data_value.is_last {
        instance_buffer.append(&mut data_value.data);
        return Ok(());
    }

    if data_value.value_type == PDataValueType::Command && data_value.is_last {
        let implicit_vr_le = dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let command = InMemDicomObject::read_dataset_with_ts(data_value.data.as_slice(), &implicit_vr_le)
            .whatever_context("failed to read incoming DIMSE command")?;

        let command_field = command
            .element(tags::COMMAND_FIELD)
            .whatever_context("missing Command Field")?
            .uint16()
            .whatever_context("Command Field is not an integer")?;

        if command_field == 0x0030 {
            // C-ECHO-RQ: always succeeds (`spec.md` §4.1).
            let response = dimse_response(*message_id, 0x8030, STATUS_SUCCESS, None, None);
            send_command(association, &response, data_value.presentation_context_id).await?;
            return Ok(());
        }

        *message_id = command
            .element(tags::MESSAGE_ID)
            .whatever_context("missing Message ID")?
            .to_int()
            .whatever_context("Message ID is not an integer")?;
        *sop_class_uid = command
            .element(tags::AFFECTED_SOP_CLASS_UID)
            .whatever_context("missing Affected SOP Class UID")?
            .to_str()
            .whatever_context("could not read Affected SOP Class UID")?
            .trim_end_matches('\0')
            .to_string();
        *sop_instance_uid = command
            .element(tags::AFFECTED_SOP_INSTANCE_UID)
            .whatever_context("missing Affected SOP Instance UID")?
            .to_str()
            .whatever_context("could not read Affected SOP Instance UID")?
            .trim_end_matches('\0')
            .to_string();
        instance_buffer.clear();
        return Ok(());
    }

    if data_value.value_type == PDataValueType::Data && data_value.is_last {
        instance_buffer.append(&mut data_value.data);

        let presentation_context = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.id == data_value.presentation_context_id)
            .whatever_context("missing presentation context for dataset PDV")?;
        let transfer_syntax_uid = presentation_context.transfer_syntax.clone();

        let status = ingest_instance(
            storage,
            instance_buffer,
            &transfer_syntax_uid,
            sop_class_uid,
            sop_instance_uid,
        );
        instance_buffer.clear();

        let implicit_vr_le = dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let response = dimse_response(
            *message_id,
            0x8001,
            status,
            Some(sop_class_uid.as_str()),
            Some(sop_instance_uid.as_str()),
        );
        let mut response_bytes = Vec::new();
        response
            .write_dataset_with_ts(&mut response_bytes, &implicit_vr_le)
            .whatever_context("could not encode C-STORE response")?;

        let pdu_response = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: data_value.presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: response_bytes,
            }],
        };
        association
            .send(&pdu_response)
            .await
            .whatever_context("failed to send C-STORE response")?;
    }

    Ok(())
}

/// Parses the dataset, serialises it with file-meta attached, and runs it
/// through `StorageManager`; returns the DICOM status to report back
/// (`spec.md` §4.1).
fn ingest_instance(
    storage: &Arc<StorageManager>,
    dataset_bytes: &[u8],
    transfer_syntax_uid: &str,
    sop_class_uid: &str,
    sop_instance_uid: &str,
) -> u16 {
    let Some(ts) = TransferSyntaxRegistry.get(transfer_syntax_uid) else {
        error!(transfer_syntax_uid, "unsupported transfer syntax");
        return STATUS_PROCESSING_FAILURE;
    };

    let dataset = match InMemDicomObject::read_dataset_with_ts(dataset_bytes, ts) {
        Ok(dataset) => dataset,
        Err(error) => {
            error!(%error, "could not parse incoming dataset");
            return STATUS_PROCESSING_FAILURE;
        }
    };

    let meta = match FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(sop_class_uid)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .transfer_syntax(transfer_syntax_uid)
        .build()
    {
        Ok(meta) => meta,
        Err(error) => {
            error!(%error, "could not build file-meta information");
            return STATUS_PROCESSING_FAILURE;
        }
    };

    let file_obj = dataset.with_exact_meta(meta);
    let id = Uuid::new_v4();
    let temp_path = match storage.save_temp_dicom_object(&file_obj, id) {
        Ok(path) => path,
        Err(error) => {
            error!(%error, "could not write temp image");
            return STATUS_OUT_OF_RESOURCES;
        }
    };

    storage.process_image(&temp_path, id);
    STATUS_SUCCESS
}

async fn send_command(
    association: &mut dicom_ul::association::ServerAssociation<TcpStream>,
    command: &InMemDicomObject<StandardDataDictionary>,
    presentation_context_id: u8,
) -> Result<(), Whatever> {
    let implicit_vr_le = dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut data = Vec::new();
    command
        .write_dataset_with_ts(&mut data, &implicit_vr_le)
        .whatever_context("could not encode DIMSE response")?;
    let pdu = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data,
        }],
    };
    association
        .send(&pdu)
        .await
        .whatever_context("failed to send DIMSE response")
}

fn dimse_response(
    message_id: u16,
    command_field: u16,
    status: u16,
    sop_class_uid: Option<&str>,
    sop_instance_uid: Option<&str>,
) -> InMemDicomObject<StandardDataDictionary> {
    let mut elements = vec![
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [command_field])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
    ];
    if let Some(sop_class_uid) = sop_class_uid {
        elements.push(DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid.to_string()),
        ));
    }
    if let Some(sop_instance_uid) = sop_instance_uid {
        elements.push(DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid.to_string()),
        ));
    }
    InMemDicomObject::command_from_element_iter(elements)
}
