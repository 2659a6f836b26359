//! Target selection and resume planning.
//!
//! The receiver picks a final path with duplicate-aware naming, pairs it with
//! a temp path that encodes the expected digest's short tag, and decides the
//! resume offset from whatever partial data that temp already holds.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use local_sent_core::constants::MAX_DUPLICATE_INDEX;
use local_sent_core::error::{Error, Result};
use local_sent_core::hash::StreamingDigest;
use local_sent_core::paths::{indexed_candidate, resolve_under, temp_path_for};

/// Chosen final/temp pair for an inbound file.
#[derive(Debug, Clone)]
pub(crate) struct TargetSelection {
    /// Base resolved path before duplicate indexing.
    pub base: PathBuf,
    /// Final path at the chosen duplicate index.
    pub final_path: PathBuf,
    /// Temp path carrying the digest tag.
    pub temp_path: PathBuf,
    /// Duplicate index of `final_path`.
    pub index: u32,
}

/// Pick the target paths for `relative_path` under `output_dir`.
///
/// Walking the duplicate sequence, a temp file tagged with this transfer's
/// digest claims its slot immediately (true resume); otherwise the first slot
/// whose final name is free wins.
pub(crate) async fn select_target(
    output_dir: &Path,
    relative_path: &str,
    sha256_hex: &str,
) -> Result<TargetSelection> {
    let base = resolve_under(output_dir, relative_path)?;
    if let Some(parent) = base.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    for index in 0..MAX_DUPLICATE_INDEX {
        let final_path = indexed_candidate(&base, index);
        let temp_path = temp_path_for(&final_path, sha256_hex);

        if tokio::fs::try_exists(&temp_path).await? {
            debug!(temp = %temp_path.display(), "resuming into existing temp");
            return Ok(TargetSelection {
                base,
                final_path,
                temp_path,
                index,
            });
        }
        if !tokio::fs::try_exists(&final_path).await? {
            return Ok(TargetSelection {
                base,
                final_path,
                temp_path,
                index,
            });
        }
    }

    Err(Error::path(format!(
        "no free name for {relative_path} after {MAX_DUPLICATE_INDEX} attempts"
    )))
}

/// Decide the resume offset for a temp file and return the digest pre-seeded
/// with the bytes being kept.
///
/// - missing or empty temp: start at 0
/// - larger than the incoming file: overwrite from 0
/// - exactly the incoming size: re-hash; a digest match means the transfer is
///   already complete, anything else overwrites from 0
/// - smaller: resume at its size
pub(crate) async fn plan_resume(
    temp_path: &Path,
    file_size: u64,
    expected_sha256: &str,
) -> Result<(u64, StreamingDigest)> {
    let existing = match tokio::fs::metadata(temp_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            warn!(temp = %temp_path.display(), "temp path is not a file, overwriting");
            0
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if existing == 0 || existing > file_size {
        return Ok((0, StreamingDigest::new()));
    }

    if existing == file_size {
        // Size alone cannot distinguish a finished resume from a stale file
        // with different content.
        let mut digest = StreamingDigest::new();
        digest.seed_from_file(temp_path, file_size).await?;
        if digest.clone().finalize_hex() == expected_sha256 {
            return Ok((file_size, digest));
        }
        return Ok((0, StreamingDigest::new()));
    }

    let mut digest = StreamingDigest::new();
    digest.seed_from_file(temp_path, existing).await?;
    Ok((existing, digest))
}

/// Promote the verified temp to its final name.
///
/// POSIX rename silently replaces an existing destination, so each slot is
/// claimed with a hard link instead: an occupied name fails the link and
/// advances the duplicate index rather than clobbering a file another
/// session just promoted. Filesystems that refuse the link (cross-device
/// output directories, no hard-link support) fall back to an
/// exclusive-create copy with the same advance-on-occupied behavior.
pub(crate) async fn promote(
    temp_path: &Path,
    base: &Path,
    start_index: u32,
) -> Result<PathBuf> {
    for index in start_index..MAX_DUPLICATE_INDEX {
        let candidate = indexed_candidate(base, index);
        match tokio::fs::hard_link(temp_path, &candidate).await {
            Ok(()) => {
                tokio::fs::remove_file(temp_path).await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(link_err) => {
                warn!(error = %link_err, "hard link failed, trying exclusive copy");
                if copy_exclusive(temp_path, &candidate).await? {
                    tokio::fs::remove_file(temp_path).await?;
                    return Ok(candidate);
                }
                continue;
            }
        }
    }

    Err(Error::path(format!(
        "no free name to promote {} into",
        temp_path.display()
    )))
}

/// Copy `src` into a freshly created `dst`.
///
/// Returns false when `dst` already exists; the create is exclusive, so a
/// concurrent winner is never overwritten. The copy is synced before it
/// counts, because promotion happens before the ack.
async fn copy_exclusive(src: &Path, dst: &Path) -> Result<bool> {
    let mut out = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let mut src_file = tokio::fs::File::open(src).await?;
    let copied = async {
        tokio::io::copy(&mut src_file, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = copied {
        drop(out);
        let _ = tokio::fs::remove_file(dst).await;
        return Err(e.into());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use local_sent_core::paths::temp_path_for;

    fn digest_of(data: &[u8]) -> String {
        let mut d = StreamingDigest::new();
        d.update(data);
        d.finalize_hex()
    }

    #[tokio::test]
    async fn fresh_target_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let selection = select_target(dir.path(), "x.ext", &digest_of(b"x"))
            .await
            .unwrap();
        assert_eq!(selection.final_path, dir.path().join("x.ext"));
        assert_eq!(selection.index, 0);
    }

    #[tokio::test]
    async fn occupied_target_advances_to_indexed_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.ext"), b"old").unwrap();

        let selection = select_target(dir.path(), "x.ext", &digest_of(b"x"))
            .await
            .unwrap();
        assert_eq!(selection.final_path, dir.path().join("x(1).ext"));
        assert_eq!(selection.index, 1);
    }

    #[tokio::test]
    async fn matching_temp_claims_occupied_slot() {
        let dir = tempfile::tempdir().unwrap();
        let digest = digest_of(b"payload");
        std::fs::write(dir.path().join("x.ext"), b"unrelated").unwrap();
        let temp = temp_path_for(&dir.path().join("x.ext"), &digest);
        std::fs::write(&temp, b"part").unwrap();

        let selection = select_target(dir.path(), "x.ext", &digest).await.unwrap();
        assert_eq!(selection.final_path, dir.path().join("x.ext"));
        assert_eq!(selection.temp_path, temp);
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_fs_access() {
        let dir = tempfile::tempdir().unwrap();
        let err = select_target(dir.path(), "../evil.txt", &digest_of(b""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Path { .. }));
    }

    #[tokio::test]
    async fn plan_resume_fresh_when_temp_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (offset, _) = plan_resume(&dir.path().join("none.part"), 100, &digest_of(b""))
            .await
            .unwrap();
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn plan_resume_overwrites_oversized_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("big.part");
        std::fs::write(&temp, vec![0u8; 200]).unwrap();

        let (offset, _) = plan_resume(&temp, 100, &digest_of(b"")).await.unwrap();
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn plan_resume_continues_partial_temp() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"0123456789".to_vec();
        let temp = dir.path().join("half.part");
        std::fs::write(&temp, &data[..4]).unwrap();

        let (offset, digest) = plan_resume(&temp, 10, &digest_of(&data)).await.unwrap();
        assert_eq!(offset, 4);

        let mut digest = digest;
        digest.update(&data[4..]);
        assert_eq!(digest.finalize_hex(), digest_of(&data));
    }

    #[tokio::test]
    async fn plan_resume_detects_completed_temp() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"complete content".to_vec();
        let temp = dir.path().join("done.part");
        std::fs::write(&temp, &data).unwrap();

        let (offset, digest) = plan_resume(&temp, data.len() as u64, &digest_of(&data))
            .await
            .unwrap();
        assert_eq!(offset, data.len() as u64);
        assert_eq!(digest.finalize_hex(), digest_of(&data));
    }

    #[tokio::test]
    async fn plan_resume_rejects_stale_same_size_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("stale.part");
        std::fs::write(&temp, b"XXXXXXXX").unwrap();

        let (offset, _) = plan_resume(&temp, 8, &digest_of(b"YYYYYYYY")).await.unwrap();
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn promote_renames_into_free_slot() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("t.part");
        std::fs::write(&temp, b"data").unwrap();
        std::fs::write(dir.path().join("f.txt"), b"old").unwrap();

        let final_path = promote(&temp, &dir.path().join("f.txt"), 0).await.unwrap();
        assert_eq!(final_path, dir.path().join("f(1).txt"));
        assert_eq!(std::fs::read(final_path).unwrap(), b"data");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn promote_never_clobbers_slots_claimed_after_selection() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("t.part");
        std::fs::write(&temp, b"late arrival").unwrap();
        // Concurrent sessions won the base slot and the first duplicate
        // after this session's target selection ran.
        std::fs::write(dir.path().join("f.txt"), b"winner").unwrap();
        std::fs::write(dir.path().join("f(1).txt"), b"runner-up").unwrap();

        let final_path = promote(&temp, &dir.path().join("f.txt"), 0).await.unwrap();
        assert_eq!(final_path, dir.path().join("f(2).txt"));
        assert_eq!(std::fs::read(dir.path().join("f.txt")).unwrap(), b"winner");
        assert_eq!(
            std::fs::read(dir.path().join("f(1).txt")).unwrap(),
            b"runner-up"
        );
        assert_eq!(std::fs::read(final_path).unwrap(), b"late arrival");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn copy_exclusive_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.part");
        let dst = dir.path().join("dst.txt");
        std::fs::write(&src, b"copied").unwrap();
        std::fs::write(&dst, b"occupied").unwrap();

        assert!(!copy_exclusive(&src, &dst).await.unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"occupied");

        std::fs::remove_file(&dst).unwrap();
        assert!(copy_exclusive(&src, &dst).await.unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"copied");
    }
}
