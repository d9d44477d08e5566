//! Per-question attachments: limit checks, sequential writes, metadata on the active record.

use audit_state::AuditStateStore;
use audit_types::{
    disambiguate_file_name, stored_file_name, AccessMode, Attachment, AttachmentCategory,
    AttachmentLimits, AttachmentStats, AuditRecord, FileFailure, IncomingFile, LimitViolation,
    ProviderKind, StorageError, StorageProvider, UploadOutcome,
};
use crate::layout::attachment_relative_path;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Attempts per file before a name collision counts as a failure.
const MAX_NAME_ATTEMPTS: usize = 100;

/// Metadata that was dropped by [`AttachmentStore::remove`]. The file itself stays where it was.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedAttachment {
    pub attachment: Attachment,
    pub retained_path: String,
    /// Absolute location on disk, when the provider is directory-backed and connected.
    pub absolute_path: Option<String>,
}

/// Reject a batch before anything is written.
pub fn check_limits(
    existing: &AttachmentStats,
    files: &[IncomingFile],
    limits: &AttachmentLimits,
) -> Result<(), LimitViolation> {
    if existing.count + files.len() > limits.max_files_per_question {
        return Err(LimitViolation::TooManyFiles {
            max: limits.max_files_per_question,
            existing: existing.count,
            incoming: files.len(),
        });
    }
    if let Some(f) = files.iter().find(|f| f.size() > limits.max_file_bytes) {
        return Err(LimitViolation::FileTooLarge {
            file_name: f.name.clone(),
            size: f.size(),
            max: limits.max_file_bytes,
        });
    }
    let incoming: u64 = files.iter().map(IncomingFile::size).sum();
    if existing.total_size + incoming > limits.max_total_bytes_per_question {
        return Err(LimitViolation::TotalTooLarge {
            max: limits.max_total_bytes_per_question,
            existing: existing.total_size,
            incoming,
        });
    }
    Ok(())
}

pub struct AttachmentStore {
    provider: Arc<dyn StorageProvider>,
    state: Arc<AuditStateStore>,
    limits: AttachmentLimits,
    /// Batches run one at a time so limit accounting sees every earlier write.
    upload_lock: Mutex<()>,
}

impl AttachmentStore {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        state: Arc<AuditStateStore>,
        limits: AttachmentLimits,
    ) -> Self {
        Self {
            provider,
            state,
            limits,
            upload_lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> &AttachmentLimits {
        &self.limits
    }

    fn active(&self) -> Result<AuditRecord, StorageError> {
        self.state
            .active()
            .ok_or_else(|| StorageError::NotFound("no active audit".to_string()))
    }

    /// Store `files` for `question_id` on the active record.
    ///
    /// Limit violations fail the whole batch before any write. After that, a file that cannot be
    /// written is reported in [`UploadOutcome::Partial`] and the rest of the batch continues.
    pub async fn add(
        &self,
        question_id: &str,
        category: AttachmentCategory,
        files: Vec<IncomingFile>,
    ) -> Result<UploadOutcome, StorageError> {
        let _guard = self.upload_lock.lock().await;

        if !self.provider.connected() {
            return Err(StorageError::NotConnected);
        }
        let record = self.active()?;
        let existing = AttachmentStats::compute(record.attachments_for(question_id), &self.limits);
        check_limits(&existing, &files, &self.limits).map_err(|v| {
            tracing::warn!(audit_id = %record.id, question_id, violation = %v, "attachment batch rejected");
            StorageError::LimitExceeded(v)
        })?;
        if files.is_empty() {
            return Ok(UploadOutcome::Complete {
                uploaded: 0,
                attachments: Vec::new(),
            });
        }
        if !self.provider.ensure_permission(AccessMode::ReadWrite).await? {
            return Err(StorageError::PermissionDenied {
                path: self.provider.location().unwrap_or_default(),
                mode: AccessMode::ReadWrite,
            });
        }

        let mut stored = Vec::with_capacity(files.len());
        let mut errors = Vec::new();
        for file in &files {
            match self.write_one(&record.id, question_id, category, file).await {
                Ok(attachment) => stored.push(attachment),
                Err(e) => {
                    tracing::warn!(
                        audit_id = %record.id,
                        question_id,
                        file = %file.name,
                        error = %e,
                        "attachment write failed"
                    );
                    errors.push(FileFailure {
                        file_name: file.name.clone(),
                        reason: e.to_string(),
                    });
                    if !matches!(e, StorageError::Conflict(_)) {
                        self.provider.report_write_failure().await;
                    }
                }
            }
        }

        if !stored.is_empty() {
            let added = stored.clone();
            self.state.update(&record.id, move |mut r| {
                r.attachments.extend(added);
                r
            })?;
        }

        tracing::info!(
            audit_id = %record.id,
            question_id,
            uploaded = stored.len(),
            failed = errors.len(),
            "attachment batch finished"
        );
        if errors.is_empty() {
            Ok(UploadOutcome::Complete {
                uploaded: stored.len(),
                attachments: stored,
            })
        } else {
            Ok(UploadOutcome::Partial {
                uploaded: stored.len(),
                failed: errors.len(),
                attachments: stored,
                errors,
            })
        }
    }

    async fn write_one(
        &self,
        audit_id: &str,
        question_id: &str,
        category: AttachmentCategory,
        file: &IncomingFile,
    ) -> Result<Attachment, StorageError> {
        let uploaded_at = chrono::Utc::now();
        let base = stored_file_name(question_id, uploaded_at, &file.name);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stored_name = if attempt == 0 {
                base.clone()
            } else {
                disambiguate_file_name(&base, attempt)
            };
            let attachment = Attachment {
                question_id: question_id.to_string(),
                category,
                original_name: file.name.clone(),
                relative_path: attachment_relative_path(category, &stored_name),
                stored_name,
                size: file.size(),
                mime_type: file.mime_type.clone(),
                uploaded_at,
            };
            match self
                .provider
                .save_attachment(audit_id, &attachment, &file.bytes)
                .await
            {
                Ok(_) => return Ok(attachment),
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict(base))
    }

    /// Drop the `index`-th attachment of `question_id` from the active record. The stored file is
    /// retained; its path is returned so the caller can tell the user where it is.
    pub fn remove(&self, question_id: &str, index: usize) -> Result<RemovedAttachment, StorageError> {
        let record = self.active()?;
        let position = record
            .attachments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.question_id == question_id)
            .nth(index)
            .map(|(i, _)| i)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "attachment {} of question {}",
                    index, question_id
                ))
            })?;
        let attachment = record.attachments[position].clone();
        self.state.update(&record.id, move |mut r| {
            r.attachments.remove(position);
            r
        })?;

        let absolute_path = match self.provider.kind() {
            ProviderKind::Directory => self
                .provider
                .location()
                .map(|root| root.join(&attachment.relative_path).display().to_string()),
            ProviderKind::LocalDatabase => None,
        };
        tracing::info!(
            audit_id = %record.id,
            question_id,
            retained = %attachment.relative_path,
            "attachment metadata removed, file retained"
        );
        Ok(RemovedAttachment {
            retained_path: attachment.relative_path.clone(),
            attachment,
            absolute_path,
        })
    }

    /// Usage against the limits, from metadata only.
    pub fn stats(&self, question_id: &str) -> Result<AttachmentStats, StorageError> {
        let record = self.active()?;
        Ok(AttachmentStats::compute(
            record.attachments_for(question_id),
            &self.limits,
        ))
    }

    pub fn list(&self, question_id: &str) -> Result<Vec<Attachment>, StorageError> {
        let record = self.active()?;
        Ok(record.attachments_for(question_id).cloned().collect())
    }

    pub async fn read(
        &self,
        question_id: &str,
        index: usize,
    ) -> Result<(Attachment, Vec<u8>), StorageError> {
        let record = self.active()?;
        let attachment = record
            .attachments_for(question_id)
            .nth(index)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "attachment {} of question {}",
                    index, question_id
                ))
            })?;
        match self.provider.load_attachment(&record.id, &attachment).await? {
            Some(bytes) => Ok((attachment, bytes)),
            None => Err(StorageError::NotFound(attachment.relative_path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(sizes: &[usize]) -> Vec<IncomingFile> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, n)| IncomingFile::new(format!("f{}.bin", i), "application/octet-stream", vec![0; *n]))
            .collect()
    }

    fn limits() -> AttachmentLimits {
        AttachmentLimits {
            max_files_per_question: 3,
            max_file_bytes: 100,
            max_total_bytes_per_question: 250,
        }
    }

    fn used(count: usize, total_size: u64) -> AttachmentStats {
        AttachmentStats {
            count,
            total_size,
            remaining: 0,
            remaining_size: 0,
        }
    }

    #[test]
    fn count_cap_includes_existing() {
        let err = check_limits(&used(2, 0), &files(&[1, 1]), &limits()).unwrap_err();
        assert_eq!(
            err,
            LimitViolation::TooManyFiles {
                max: 3,
                existing: 2,
                incoming: 2
            }
        );
        assert!(check_limits(&used(2, 0), &files(&[1]), &limits()).is_ok());
    }

    #[test]
    fn per_file_cap_names_the_file() {
        let err = check_limits(&used(0, 0), &files(&[10, 101]), &limits()).unwrap_err();
        assert!(matches!(err, LimitViolation::FileTooLarge { ref file_name, size: 101, .. } if file_name == "f1.bin"));
    }

    #[test]
    fn cumulative_cap_includes_existing() {
        let err = check_limits(&used(1, 200), &files(&[60]), &limits()).unwrap_err();
        assert!(matches!(err, LimitViolation::TotalTooLarge { existing: 200, incoming: 60, .. }));
        assert!(check_limits(&used(1, 200), &files(&[50]), &limits()).is_ok());
    }
}
