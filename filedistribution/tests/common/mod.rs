//! Scripted distribution source for integration tests.
//!
//! On an accepted serve-file call the source pushes the artifact to the
//! downloader's receiver from a separate thread, the way a real source calls
//! back over the network after replying.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use filedistribution::codec::{content_hash, CompressionType, EncodingType};
use filedistribution::download::{
    FileSource, ServeFileRequest, ServeFileResponse, SourceError,
};
use filedistribution::protocol::{FileEof, FileMeta, FilePart};
use filedistribution::{FileReceiver, FileReference, SessionId};

/// What the source does on the next serve-file call.
#[derive(Debug, Clone)]
pub enum Step {
    ConnectionError,
    Reject(i32, String),
    Accept,
    /// Accept but never push anything.
    AcceptSilently,
    /// Never answer the call.
    Hang,
}

/// An artifact the source can push.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub encoding_type: EncodingType,
    pub compression: CompressionType,
    pub filename: String,
    pub content: Vec<u8>,
    pub chunk_size: usize,
    /// Announced hash; defaults to the real content hash.
    pub hash_override: Option<u64>,
}

impl Artifact {
    pub fn file(filename: &str, content: &[u8]) -> Self {
        Self {
            encoding_type: EncodingType::File,
            compression: CompressionType::None,
            filename: filename.to_string(),
            content: content.to_vec(),
            chunk_size: 4,
            hash_override: None,
        }
    }

    pub fn with_hash(mut self, hash: u64) -> Self {
        self.hash_override = Some(hash);
        self
    }
}

pub struct ScriptedSource {
    calls: AtomicUsize,
    switches: AtomicUsize,
    next_session: AtomicU64,
    script: Mutex<VecDeque<Step>>,
    artifacts: Mutex<HashMap<FileReference, Artifact>>,
    receiver: OnceLock<FileReceiver>,
    push_delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::with_push_delay(Duration::ZERO)
    }

    pub fn with_push_delay(push_delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            switches: AtomicUsize::new(0),
            next_session: AtomicU64::new(1),
            script: Mutex::new(VecDeque::new()),
            artifacts: Mutex::new(HashMap::new()),
            receiver: OnceLock::new(),
            push_delay,
        }
    }

    /// Steps consumed by the next calls. Once exhausted, known references are
    /// accepted and unknown ones rejected as not found.
    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    pub fn artifact(self, reference: &str, artifact: Artifact) -> Self {
        self.artifacts
            .lock()
            .insert(FileReference::new(reference), artifact);
        self
    }

    pub fn connect(&self, receiver: FileReceiver) {
        let _ = self.receiver.set(receiver);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    fn next_step(&self, reference: &FileReference) -> Step {
        if let Some(step) = self.script.lock().pop_front() {
            return step;
        }
        if self.artifacts.lock().contains_key(reference) {
            Step::Accept
        } else {
            Step::Reject(1, format!("file reference '{}' not found", reference))
        }
    }

    fn push(&self, reference: FileReference) {
        let Some(artifact) = self.artifacts.lock().get(&reference).cloned() else {
            return;
        };
        let Some(receiver) = self.receiver.get().cloned() else {
            return;
        };
        let session_id = SessionId::new(self.next_session.fetch_add(1, Ordering::SeqCst));
        let delay = self.push_delay;

        std::thread::spawn(move || {
            std::thread::sleep(delay);
            push_chunked(&receiver, reference, session_id, &artifact);
        });
    }
}

/// Deliver `artifact` as meta, parts and eof.
pub fn push_chunked(
    receiver: &FileReceiver,
    reference: FileReference,
    session_id: SessionId,
    artifact: &Artifact,
) {
    let meta = FileMeta {
        reference,
        session_id,
        encoding_type: artifact.encoding_type,
        compression: artifact.compression,
        filename: artifact.filename.clone(),
        total_length: artifact.content.len() as u64,
    };
    if receiver.receive_file_meta(meta).is_err() {
        return;
    }

    for (index, chunk) in artifact.content.chunks(artifact.chunk_size.max(1)).enumerate() {
        let part = FilePart {
            session_id,
            index: index as u32,
            data: Bytes::copy_from_slice(chunk),
        };
        if receiver.receive_file_part(part).is_err() {
            return;
        }
    }

    let hash = artifact
        .hash_override
        .unwrap_or_else(|| content_hash(&artifact.content));
    let _ = receiver.receive_file_eof(FileEof::ok(session_id, hash));
}

impl FileSource for ScriptedSource {
    fn serve_file<'a>(
        &'a self,
        request: &'a ServeFileRequest,
    ) -> BoxFuture<'a, Result<ServeFileResponse, SourceError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.next_step(&request.reference) {
                Step::ConnectionError => Err(SourceError::Connection("connection refused".into())),
                Step::Reject(code, message) => Ok(ServeFileResponse { code, message }),
                Step::Accept => {
                    self.push(request.reference.clone());
                    Ok(ServeFileResponse::accepted())
                }
                Step::AcceptSilently => Ok(ServeFileResponse::accepted()),
                Step::Hang => futures::future::pending().await,
            }
        }
        .boxed()
    }

    fn switch_connection(&self) {
        self.switches.fetch_add(1, Ordering::SeqCst);
    }
}
