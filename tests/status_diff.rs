//! Status and diff of a mounted checkout

use anyhow::Result;
use checkoutfs::diff::{render, DiffBody};
use checkoutfs::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct Checkout {
    _dir: TempDir,
    service: CheckoutService,
    path: PathBuf,
    mount: Arc<Mount>,
}

async fn checkout(builder: SnapshotBuilder) -> Result<Checkout> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = TempDir::new()?;
    let store = LocalStore::open(&dir.path().join("store"))?;
    let commit = builder.commit(&store)?;
    let service =
        CheckoutService::open(Config::with_data_dir(dir.path().join("data")), Arc::new(store))?;

    let path = dir.path().join("repo");
    let mount = service.clone_checkout(&path, commit).await?;
    Ok(Checkout {
        _dir: dir,
        service,
        path,
        mount,
    })
}

fn codes(pairs: &[(&str, char)]) -> BTreeMap<String, char> {
    pairs.iter().map(|(p, c)| (p.to_string(), *c)).collect()
}

#[tokio::test]
async fn test_modified_file_diff() -> Result<()> {
    let c = checkout(
        SnapshotBuilder::new("c1")
            .file("rootfile.txt", "", 0o644)?
            .file("dir1/a.txt", "original contents\n", 0o644)?,
    )
    .await?;

    c.mount
        .write_file("dir1/a.txt", b"new line\noriginal contents\n", 0o644)?;

    let report = c.service.get_status(&c.path)?;
    assert_eq!(report.changed_codes(), codes(&[("dir1/a.txt", 'M')]));

    let diffs = c.service.get_diff(&c.path)?;
    assert_eq!(diffs.len(), 1);
    let DiffBody::Text(hunks) = &diffs[0].body else {
        panic!("expected a text diff");
    };
    assert_eq!(hunks.len(), 1);
    assert_eq!(hunks[0].header(), "@@ -1,1 +1,2 @@");

    assert_eq!(
        render(&diffs),
        "diff --git a/dir1/a.txt b/dir1/a.txt\n\
         --- a/dir1/a.txt\n\
         +++ b/dir1/a.txt\n\
         @@ -1,1 +1,2 @@\n\
         +new line\n \
         original contents\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_added_file_diff() -> Result<()> {
    let c = checkout(
        SnapshotBuilder::new("c1")
            .file("rootfile.txt", "", 0o644)?
            .file("dir1/a.txt", "original contents\n", 0o644)?,
    )
    .await?;

    c.mount
        .write_file("dir1/b.txt", b"new file\n1234\n5678\n", 0o644)?;

    let report = c.service.get_status(&c.path)?;
    assert_eq!(report.get("dir1/b.txt"), Some(FileStatus::Added));

    assert_eq!(
        render(&c.service.get_diff(&c.path)?),
        "diff --git a/dir1/b.txt b/dir1/b.txt\n\
         new file mode 100644\n\
         --- /dev/null\n\
         +++ b/dir1/b.txt\n\
         @@ -0,0 +1,3 @@\n\
         +new file\n\
         +1234\n\
         +5678\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_symlink_retarget_is_modified() -> Result<()> {
    let c = checkout(
        SnapshotBuilder::new("c1")
            .file("contents1", "c1\n", 0o644)?
            .file("contents2", "c2\n", 0o644)?
            .symlink("symlink", "contents1")?,
    )
    .await?;

    c.mount.write_symlink("symlink", "contents2")?;

    let report = c.service.get_status(&c.path)?;
    assert_eq!(report.changed_codes(), codes(&[("symlink", 'M')]));

    let diffs = c.service.get_diff(&c.path)?;
    assert_eq!(diffs[0].body, DiffBody::Symlink);

    c.mount.write_symlink("symlink", "contents1")?;
    assert!(c.service.get_status(&c.path)?.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_status_ignores_edit_history() -> Result<()> {
    let c = checkout(
        SnapshotBuilder::new("c1")
            .file("hello", "hola\n", 0o644)?
            .file("adir/file", "foo!\n", 0o644)?,
    )
    .await?;

    c.mount.write_file("hello", b"one\n", 0o644)?;
    c.mount.remove_file("adir/file")?;
    c.mount.write_file("hello", b"two\n", 0o644)?;
    c.mount.write_file("added", b"x\n", 0o644)?;
    let first = c.service.get_status(&c.path)?;

    c.service.unmount(&c.path).await?;
    c.service.mount(&c.path).await?;
    let second = c.service.get_status(&c.path)?;

    assert_eq!(first, second);
    assert_eq!(
        second.changed_codes(),
        codes(&[("added", 'A'), ("adir/file", 'R'), ("hello", 'M')])
    );
    Ok(())
}

#[tokio::test]
async fn test_status_requires_mount() -> Result<()> {
    let c = checkout(SnapshotBuilder::new("c1").file("hello", "hola\n", 0o644)?).await?;
    c.service.unmount(&c.path).await?;

    assert!(matches!(
        c.service.get_status(&c.path),
        Err(Error::NotMounted(_))
    ));
    assert!(matches!(
        c.service.get_diff(&c.path),
        Err(Error::NotMounted(_))
    ));
    Ok(())
}
