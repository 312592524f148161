//! Lifecycle scenarios against a real on-disk service

use anyhow::Result;
use checkoutfs::fault::{FaultDefinition, FLUSH_KEY_CLASS, MOUNT_KEY_CLASS, UNMOUNT_KEY_CLASS};
use checkoutfs::mount::FileContents;
use checkoutfs::prelude::*;
use checkoutfs::snapshot::BackingStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    dir: TempDir,
    store: Arc<LocalStore>,
    commit: CommitId,
}

impl Harness {
    fn new() -> Result<Self> {
        init_tracing();
        let dir = TempDir::new()?;
        let store = Arc::new(LocalStore::open(&dir.path().join("store"))?);
        let commit = SnapshotBuilder::new("initial")
            .file("hello", "hola\n", 0o644)?
            .file("adir/file", "foo!\n", 0o644)?
            .file("bdir/test.sh", "#!/bin/bash\necho test\n", 0o755)?
            .file("bdir/noexec.sh", "#!/bin/bash\necho test\n", 0o644)?
            .symlink("slink", "hello")?
            .commit(&store)?;
        Ok(Harness { dir, store, commit })
    }

    fn config(&self) -> Config {
        let mut config = Config::with_data_dir(self.dir.path().join("data"));
        config.fault_injection.enabled = true;
        config
    }

    fn service(&self) -> Result<CheckoutService> {
        let backing: Arc<dyn BackingStore> = self.store.clone();
        Ok(CheckoutService::open(self.config(), backing)?)
    }

    fn mount_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

async fn wait_for_state(service: &CheckoutService, path: &Path, state: MountState) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while service.mount_state(path)? != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<_, Error>(())
    })
    .await??;
    Ok(())
}

fn read_text(service: &CheckoutService, mount: &Path, path: &str) -> Result<String> {
    match service.checkout(mount)?.read_file(path)? {
        FileContents::File { content, .. } => Ok(String::from_utf8(content)?),
        FileContents::Symlink(target) => Ok(target),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unmount_remount_keeps_overlay() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");

    let mount = service.clone_checkout(&mnt, h.commit.clone()).await?;
    mount.write_file("overlayonly", b"foo!\n", 0o644)?;

    service.unmount(&mnt).await?;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);
    let entries: Vec<_> = std::fs::read_dir(&mnt)?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(entries, vec![std::ffi::OsString::from("README_CHECKOUT.txt")]);

    service.mount(&mnt).await?;
    assert!(!mnt.join("README_CHECKOUT.txt").exists());
    assert_eq!(read_text(&service, &mnt, "overlayonly")?, "foo!\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overlay_survives_restart() -> Result<()> {
    let h = Harness::new()?;
    let mnt = h.mount_path("mnt");
    {
        let service = h.service()?;
        let mount = service.clone_checkout(&mnt, h.commit.clone()).await?;
        mount.write_file("hello", b"adios\n", 0o644)?;
        service.shutdown().await?;
    }

    let service = h.service()?;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);
    service.mount(&mnt).await?;
    assert_eq!(read_text(&service, &mnt, "hello")?, "adios\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_unmount() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;

    service.unmount(&mnt).await?;
    let err = service.unmount(&mnt).await.unwrap_err();
    assert!(matches!(err, Error::NotMounted(_)));
    assert!(err.is_state_violation());
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);

    service.mount(&mnt).await?;
    assert_eq!(read_text(&service, &mnt, "adir/file")?, "foo!\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unmount_with_open_handles() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    let mount = service.clone_checkout(&mnt, h.commit.clone()).await?;

    let file = mount.open("hello", libc::O_RDWR)?;
    let dir = mount.open("adir", libc::O_RDONLY)?;
    assert_eq!(mount.open_handle_count(), 2);

    service.unmount(&mnt).await?;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);

    mount.close(dir)?;
    assert!(matches!(
        mount.write_handle(file, b"late\n"),
        Err(Error::StaleHandle(_))
    ));
    mount.close(file)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mount_held_in_initializing_by_fault() -> Result<()> {
    let h = Harness::new()?;
    let service = Arc::new(h.service()?);
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;
    service.unmount(&mnt).await?;
    assert_eq!(
        service.list_mounts().into_values().collect::<Vec<_>>(),
        vec![MountState::NotRunning]
    );

    service.inject_fault(FaultDefinition::block(MOUNT_KEY_CLASS, ".*"))?;

    let task = {
        let service = service.clone();
        let mnt = mnt.clone();
        tokio::spawn(async move { service.mount(&mnt).await })
    };

    wait_for_state(&service, &mnt, MountState::Initializing).await?;
    tokio::time::timeout(Duration::from_secs(10), async {
        while service.faults().pending_count(MOUNT_KEY_CLASS) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.mount_state(&mnt)?, MountState::Initializing);
    assert!(!task.is_finished());

    assert_eq!(service.unblock_fault(MOUNT_KEY_CLASS, ".*")?, 1);
    task.await??;
    wait_for_state(&service, &mnt, MountState::Running).await?;
    assert!(service.list_faults().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unmount_held_in_shutting_down_by_fault() -> Result<()> {
    let h = Harness::new()?;
    let service = Arc::new(h.service()?);
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;

    let key = mnt.canonicalize()?.to_string_lossy().into_owned();
    service.inject_fault(FaultDefinition::block(UNMOUNT_KEY_CLASS, regex::escape(&key)))?;

    let task = {
        let service = service.clone();
        let mnt = mnt.clone();
        tokio::spawn(async move { service.unmount(&mnt).await })
    };

    wait_for_state(&service, &mnt, MountState::ShuttingDown).await?;
    assert!(matches!(
        service.checkout(&mnt)?.write_file("hello", b"x", 0o644),
        Err(Error::NotMounted(_))
    ));

    service.unblock_fault(UNMOUNT_KEY_CLASS, &regex::escape(&key))?;
    task.await??;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mounts_are_independent() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt1 = h.mount_path("mnt1");
    let mnt2 = h.mount_path("mnt2");

    let first = service.clone_checkout(&mnt1, h.commit.clone()).await?;
    let second = service.clone_checkout(&mnt2, h.commit.clone()).await?;
    first.write_file("hello", b"one\n", 0o644)?;
    second.write_file("hello", b"two\n", 0o644)?;

    service.unmount(&mnt2).await?;
    assert_eq!(service.mount_state(&mnt1)?, MountState::Running);
    assert!(mnt2.join("README_CHECKOUT.txt").exists());

    let removed_overlay = second.record().overlay_dir.clone();
    service.remove(&mnt2).await?;

    let mounts = service.list_mounts();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts.get(&mnt1.canonicalize()?), Some(&MountState::Running));
    assert!(!mnt2.exists());
    assert!(!removed_overlay.exists());
    assert!(first.record().overlay_dir.exists());
    assert_eq!(read_text(&service, &mnt1, "hello")?, "one\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_requires_unmount() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;

    let err = service.remove(&mnt).await.unwrap_err();
    assert!(matches!(err, Error::StillMounted(_)));
    assert_eq!(service.mount_state(&mnt)?, MountState::Running);

    service.force_remove(&mnt).await?;
    assert!(service.list_mounts().is_empty());
    assert!(matches!(
        service.mount(&mnt).await,
        Err(Error::UnknownCheckout(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clone_onto_existing_checkout() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;

    let err = service
        .clone_checkout(&mnt, h.commit.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::CheckoutExists(_)));
    Ok(())
}

fn failing_flush() -> FaultDefinition {
    FaultDefinition {
        key_class: FLUSH_KEY_CLASS.into(),
        key_value_regex: ".*".into(),
        kind: FaultKind::Error("disk full".into()),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_flush_stays_shutting_down_until_retry() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    let mount = service.clone_checkout(&mnt, h.commit.clone()).await?;
    mount.write_file("hello", b"adios\n", 0o644)?;

    service.inject_fault(failing_flush())?;
    let err = service.unmount(&mnt).await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(service.mount_state(&mnt)?, MountState::ShuttingDown);
    assert!(!mnt.join("README_CHECKOUT.txt").exists());

    let err = service.remove(&mnt).await.unwrap_err();
    assert!(matches!(err, Error::StillMounted(_)));

    assert!(service.remove_fault(FLUSH_KEY_CLASS, ".*"));
    service.unmount(&mnt).await?;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);

    service.mount(&mnt).await?;
    assert_eq!(read_text(&service, &mnt, "hello")?, "adios\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_force_remove_after_failed_flush() -> Result<()> {
    let h = Harness::new()?;
    let service = h.service()?;
    let mnt = h.mount_path("mnt");
    let mount = service.clone_checkout(&mnt, h.commit.clone()).await?;
    let overlay_dir = mount.record().overlay_dir.clone();

    service.inject_fault(failing_flush())?;
    assert!(service.unmount(&mnt).await.is_err());
    assert_eq!(service.mount_state(&mnt)?, MountState::ShuttingDown);

    service.force_remove(&mnt).await?;
    assert!(service.list_mounts().is_empty());
    assert!(!overlay_dir.exists());
    assert!(!mnt.exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_mount_cleared_by_unmount() -> Result<()> {
    let h = Harness::new()?;
    let service = Arc::new(h.service()?);
    let mnt = h.mount_path("mnt");
    service.clone_checkout(&mnt, h.commit.clone()).await?;
    service.unmount(&mnt).await?;

    service.inject_fault(FaultDefinition::block(MOUNT_KEY_CLASS, ".*"))?;
    let task = {
        let service = service.clone();
        let mnt = mnt.clone();
        tokio::spawn(async move { service.mount(&mnt).await })
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        while service.faults().pending_count(MOUNT_KEY_CLASS) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(service.faults().pending_count(MOUNT_KEY_CLASS), 0);
    assert_eq!(service.mount_state(&mnt)?, MountState::Initializing);

    let err = service.mount(&mnt).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyMounted(_)));

    service.unmount(&mnt).await?;
    assert_eq!(service.mount_state(&mnt)?, MountState::NotRunning);

    assert!(service.remove_fault(MOUNT_KEY_CLASS, ".*"));
    service.mount(&mnt).await?;
    assert_eq!(service.mount_state(&mnt)?, MountState::Running);
    Ok(())
}
