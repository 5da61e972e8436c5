//! Top-level decode entry points.

use crate::binarize::ThresholdPolicy;
use crate::cancel::CancelToken;
use crate::errors::{DecodeError, Result};
use crate::event::DecodeOutcome;
use crate::vobsub::Index;
use crate::{pgs, vobsub};

/// Which subtitle container a byte stream holds.  Callers say which
/// format they have; we never sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Blu-ray PGS, a `.sup` file.
    Pgs,
    /// DVD VobSub, a `.sub` file plus its `.idx` index.
    VobSub,
}

/// Knobs for a decode run.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// How to pick the black/white threshold for each image.
    pub threshold: ThresholdPolicy,
    /// Pixels with alpha below this are always background.
    pub alpha_cutoff: u8,
    /// Checked between packets; lets another thread stop a long decode.
    pub cancel: Option<CancelToken>,
}

impl Default for DecodeOptions {
    fn default() -> DecodeOptions {
        DecodeOptions {
            threshold: ThresholdPolicy::default(),
            alpha_cutoff: 1,
            cancel: None,
        }
    }
}

/// Decode a subtitle stream of the stated kind.
///
/// `index` is the text of the `.idx` file, required for
/// [`ContainerKind::VobSub`] and ignored for PGS.
pub fn decode(
    kind: ContainerKind,
    data: &[u8],
    index: Option<&str>,
    options: &DecodeOptions,
) -> Result<DecodeOutcome> {
    match kind {
        ContainerKind::Pgs => pgs::decode(data, options),
        ContainerKind::VobSub => {
            let index = index.ok_or_else(|| DecodeError::MissingIndexFile {
                reason: "no index file provided".to_string(),
            })?;
            decode_vobsub(data, index, options)
        }
    }
}

/// Decode a Blu-ray `.sup` stream.
pub fn decode_pgs(data: &[u8], options: &DecodeOptions) -> Result<DecodeOutcome> {
    pgs::decode(data, options)
}

/// Decode a DVD `.sub` stream with the text of its `.idx` file.
pub fn decode_vobsub(data: &[u8], index: &str, options: &DecodeOptions) -> Result<DecodeOutcome> {
    let index = Index::parse(index)?;
    vobsub::decode(data, &index, options)
}

#[test]
fn vobsub_without_index_is_fatal() {
    let err = decode(ContainerKind::VobSub, &[], None, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, DecodeError::MissingIndexFile { .. }));
}
