mod common;

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use common::{engine, populate, MemoryRemote};
use mirror_deploy::config::VerifyStrategy;
use mirror_deploy::deploy::ReloadMode;
use mirror_deploy::logger::StatusLevel;
use mirror_deploy::mapper::{FsEvent, FsEventKind};
use mirror_deploy::prompt::AlwaysYes;
use mirror_deploy::watcher::FsWatcher;

const WAIT: Duration = Duration::from_secs(10);

/// Skips events until one of `kind` on `path` shows up
async fn expect(rx: &mut UnboundedReceiver<FsEvent>, kind: FsEventKind, path: &Path) {
    let wanted = FsEvent::new(kind, path);
    let found = timeout(WAIT, async {
        while let Some(ev) = rx.recv().await {
            if ev == wanted {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "no {kind:?} for {}", path.display());
}

#[tokio::test]
async fn native_events_arrive_classified_and_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let (_guard, mut rx) = FsWatcher::start(&root).unwrap().into_parts();

    let file = root.join("a.txt");
    fs::write(&file, "one").unwrap();
    expect(&mut rx, FsEventKind::Add, &file).await;

    let mut f = fs::OpenOptions::new().append(true).open(&file).unwrap();
    f.write_all(b" two").unwrap();
    f.sync_all().unwrap();
    drop(f);
    expect(&mut rx, FsEventKind::Change, &file).await;

    let sub = root.join("sub");
    fs::create_dir(&sub).unwrap();
    expect(&mut rx, FsEventKind::AddDir, &sub).await;

    fs::remove_file(&file).unwrap();
    expect(&mut rx, FsEventKind::Unlink, &file).await;

    fs::remove_dir(&sub).unwrap();
    expect(&mut rx, FsEventKind::UnlinkDir, &sub).await;
}

#[tokio::test]
async fn auto_deploy_reloads_then_mirrors_new_files() {
    let remote = MemoryRemote::new();
    remote.put_file("/srv/app/stale.txt", b"old");
    let (engine, status) = engine(&remote, VerifyStrategy::Probe);
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    populate(&root, &[("seed.txt", "seed")]);

    let run = engine.auto_deploy(&root, ReloadMode::Force, Arc::new(AlwaysYes));
    let mirrored = async {
        while !status.contains(StatusLevel::Success, "Reloaded in") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // keep touching the file until the watcher has picked it up
        for n in 0.. {
            if remote.file("/srv/app/live.txt").is_some() {
                break;
            }
            fs::write(root.join("live.txt"), format!("v{n}")).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };

    tokio::select! {
        ended = run => panic!("watching stopped early: {ended:?}"),
        waited = timeout(WAIT, mirrored) => assert!(waited.is_ok(), "live.txt never mirrored"),
    }
    assert_eq!(remote.file("/srv/app/seed.txt").as_deref(), Some(&b"seed"[..]));
    assert_eq!(remote.node("/srv/app/stale.txt"), None);
}
