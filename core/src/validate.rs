//! Recipient/address validation and envelope/attachment pre-checks (C5).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{EmailAttachment, MailEnvelope, SendOptions};

const MAX_ADDRESS_LEN: usize = 254;

// `local@domain.tld`, TLD at least two letters. Deliberately permissive about
// the local part (it delegates real deliverability checks to the backend);
// this only guards against obviously malformed input reaching Graph.
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?x)
        ^
        [^\s@]+            # local part: no whitespace, no '@'
        @
        [^\s@]+             # domain labels
        \.
        [A-Za-z]{2,}        # TLD
        $
    ")
    .expect("static address regex is valid")
});

/// Error raised by validation of a [`MailEnvelope`] before any backend call is made.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("envelope has no recipients")]
    NoRecipients,

    #[error("invalid address in field `{field}`: `{address}`")]
    InvalidAddress { field: &'static str, address: String },

    #[error("attachment `{file_name}` has no path or is empty")]
    EmptyAttachment { file_name: String },

    #[error("attachment `{file_name}` is not a readable regular file: {source}")]
    UnreadableAttachment {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("inline attachment `{file_name}` is missing a content-id")]
    MissingContentId { file_name: String },

    #[error("attachment file name sanitizes to empty: `{original}`")]
    EmptyFileName { original: String },

    #[error("aggregate attachment size {actual} exceeds cap {cap}")]
    AggregateSizeExceeded { actual: u64, cap: u64 },
}

/// Validates the grammar described in §4.4 "Validating": non-empty, ≤254 bytes,
/// local and domain parts present, matching `local@domain.tld` with a TLD of
/// at least two letters.
///
/// `is_valid_address(a)` implies `a.len() <= 254` and `a` contains exactly one `@`.
pub fn is_valid_address(address: &str) -> bool {
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return false;
    }
    if address.matches('@').count() != 1 {
        return false;
    }
    ADDRESS_RE.is_match(address)
}

/// Validate recipients, effective sender, subject length invariants (already
/// enforced by [`crate::sanitize::sanitize_subject`]) and attachments as a
/// group, per the "Validating" step contract.
pub fn validate_envelope(
    envelope: &MailEnvelope,
    effective_sender: &str,
    options: &SendOptions,
) -> Result<(), ValidationError> {
    if envelope.to.is_empty() {
        return Err(ValidationError::NoRecipients);
    }

    check_addresses("to", &envelope.to)?;
    check_addresses("cc", &envelope.cc)?;
    check_addresses("bcc", &envelope.bcc)?;

    if !is_valid_address(effective_sender) {
        return Err(ValidationError::InvalidAddress {
            field: "from",
            address: effective_sender.to_string(),
        });
    }

    validate_attachments(&envelope.attachments, options)?;

    Ok(())
}

fn check_addresses(field: &'static str, addresses: &[String]) -> Result<(), ValidationError> {
    for address in addresses {
        if !is_valid_address(address) {
            return Err(ValidationError::InvalidAddress {
                field,
                address: address.clone(),
            });
        }
    }
    Ok(())
}

/// Pre-checks attachments as a group: each path exists and is non-empty,
/// inline attachments carry a content-id, and the aggregate size does not
/// exceed `options.max_aggregate_attachment_bytes`.
pub fn validate_attachments(
    attachments: &[EmailAttachment],
    options: &SendOptions,
) -> Result<(), ValidationError> {
    let mut aggregate: u64 = 0;

    for attachment in attachments {
        if attachment.inline
            && attachment
                .content_id
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(ValidationError::MissingContentId {
                file_name: attachment.file_name.clone(),
            });
        }

        if crate::sanitize::sanitize_filename(&attachment.file_name).is_empty() {
            return Err(ValidationError::EmptyFileName {
                original: attachment.file_name.clone(),
            });
        }

        let metadata =
            std::fs::metadata(&attachment.path).map_err(|source| ValidationError::UnreadableAttachment {
                file_name: attachment.file_name.clone(),
                source,
            })?;

        if !metadata.is_file() || metadata.len() == 0 {
            return Err(ValidationError::EmptyAttachment {
                file_name: attachment.file_name.clone(),
            });
        }

        aggregate += metadata.len();
    }

    if aggregate > options.max_aggregate_attachment_bytes {
        return Err(ValidationError::AggregateSizeExceeded {
            actual: aggregate,
            cap: options.max_aggregate_attachment_bytes,
        });
    }

    Ok(())
}
