//! Shared state handed to the cloud service and every client it creates.
//!
//! One context per service instance; there is no process-wide state.

use std::sync::Arc;

use edgelink_core::{CloudServiceOptions, KuraPayload, PayloadEncoding, TopicNamespace};
use parking_lot::RwLock;
use tracing::debug;

use crate::codec::{self, Marshaller, PayloadCodec};
use crate::error::{CloudError, CloudResult};
use crate::transport::DataService;

/// Transport, codecs and the current options snapshot.
pub struct CloudContext {
    data_service: Arc<dyn DataService>,
    options: RwLock<Arc<CloudServiceOptions>>,
    codec: Arc<dyn PayloadCodec>,
    marshaller: Arc<dyn Marshaller>,
}

impl CloudContext {
    pub fn new(
        data_service: Arc<dyn DataService>,
        codec: Arc<dyn PayloadCodec>,
        marshaller: Arc<dyn Marshaller>,
    ) -> Self {
        Self {
            data_service,
            options: RwLock::new(Arc::new(CloudServiceOptions::default())),
            codec,
            marshaller,
        }
    }

    pub fn data_service(&self) -> &Arc<dyn DataService> {
        &self.data_service
    }

    /// Current options. The snapshot never changes once handed out.
    pub fn options(&self) -> Arc<CloudServiceOptions> {
        self.options.read().clone()
    }

    /// Swaps in a new snapshot, returning the old one.
    pub fn replace_options(&self, options: CloudServiceOptions) -> Arc<CloudServiceOptions> {
        std::mem::replace(&mut *self.options.write(), Arc::new(options))
    }

    pub fn namespace(&self) -> TopicNamespace {
        self.options().topic_namespace()
    }

    /// Encodes an application payload with the configured encoding.
    pub fn encode_payload(&self, payload: &KuraPayload) -> CloudResult<Vec<u8>> {
        self.encode_with(&self.options(), payload)
    }

    /// Encodes with an explicit snapshot, so a caller can build the topic
    /// and the bytes from the same options.
    pub fn encode_with(&self, options: &CloudServiceOptions, payload: &KuraPayload) -> CloudResult<Vec<u8>> {
        match options.payload_encoding() {
            PayloadEncoding::KuraProtobuf => {
                let bytes = self.codec.encode(payload)?;
                if options.encode_gzip() {
                    codec::gzip(&bytes)
                } else {
                    Ok(bytes)
                }
            }
            PayloadEncoding::SimpleJson => {
                Ok(self.marshaller.marshal(payload)?.into_bytes())
            }
        }
    }

    /// Decodes inbound bytes.
    ///
    /// Gzip input is detected by its magic bytes. Anything that cannot be
    /// decoded is handed on as a body-only payload.
    pub fn decode_payload(&self, bytes: &[u8]) -> KuraPayload {
        match self.try_decode(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, len = bytes.len(), "Payload not decodable, passing raw body");
                KuraPayload::from_body(bytes.to_vec())
            }
        }
    }

    fn try_decode(&self, bytes: &[u8]) -> CloudResult<KuraPayload> {
        match self.options().payload_encoding() {
            PayloadEncoding::KuraProtobuf => {
                if codec::is_gzipped(bytes) {
                    self.codec.decode(&codec::gunzip(bytes)?)
                } else {
                    self.codec.decode(bytes)
                }
            }
            PayloadEncoding::SimpleJson => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| CloudError::Decode(format!("payload is not UTF-8: {e}")))?;
                self.marshaller.unmarshal(text)
            }
        }
    }
}
