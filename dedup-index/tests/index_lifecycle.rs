//! End-to-end lifecycle scenarios driving the public API the way an
//! embedder would: build zones/volume/state store directly, dispatch
//! requests, and exercise save/load/replay/rebuild.

use std::sync::Arc;

use dedup_index::{
    ChapterWriter, ChunkName, Dispatcher, FileVolume, Geometry, Index, IndexStateStore, IndexZone, LoadContext,
    LoadType, Location, RecordMetadata, Request, Statistics, Volume,
};

fn name(tag: u8) -> ChunkName {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[31] = tag;
    ChunkName::new(bytes)
}

fn single_zone(geometry: Arc<Geometry>, volume: Arc<dyn Volume>) -> IndexZone {
    let stats = Arc::new(Statistics::default());
    let writer = Arc::new(ChapterWriter::new(Arc::clone(&volume)));
    IndexZone::new(0, 10_000, geometry, stats, volume, writer, 4)
}

#[test]
fn insert_then_query_within_open_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = Arc::new(Geometry::dense(8, 8));
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(dir.path(), *geometry).unwrap());
    let dispatcher = Dispatcher::new(vec![single_zone(Arc::clone(&geometry), volume)], false);

    let target = name(1);
    dispatcher
        .submit(Request::index(target, RecordMetadata::new(vec![1, 2, 3])))
        .unwrap();

    let result = dispatcher.submit(Request::query(target)).unwrap();
    assert_eq!(result.location, Location::InOpenChapter);
}

#[test]
fn age_out_after_chapters_cycle_past_window() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = Arc::new(Geometry::dense(8, 8));
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(dir.path(), *geometry).unwrap());
    let mut zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));

    let target = name(1);
    let mut index = Request::index(target, RecordMetadata::new(vec![1]));
    zone.dispatch(&mut index).unwrap();

    for _ in 0..8 {
        zone.advance_chapter().unwrap();
    }

    let mut query = Request::query(target);
    zone.dispatch(&mut query).unwrap();
    assert_eq!(query.location, Location::Unavailable);
}

#[test]
fn two_names_sharing_a_slot_collide_but_remain_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = Arc::new(Geometry::dense(8, 8));
    let stats = Arc::new(Statistics::default());
    let mut shard = dedup_index::MasterIndexShard::new(0, 10_000, Arc::clone(&geometry), Arc::clone(&stats));
    shard.advance_open_chapter(3);

    // Hunt for two distinct names whose coarse slot genuinely collides,
    // mirroring the 2^21-slot space the master index uses internally.
    const SLOTS: u32 = 1 << 21;
    let mut seen = std::collections::HashMap::new();
    let (a, b) = (0..=u32::MAX)
        .step_by(104_729) // a large prime stride, to sample broadly without enumerating everything
        .map(|tail| {
            let mut bytes = [0u8; 32];
            bytes[28..32].copy_from_slice(&tail.to_be_bytes());
            ChunkName::new(bytes)
        })
        .find_map(|candidate| {
            let slot = candidate.coarse_slot(SLOTS);
            match seen.insert(slot, candidate) {
                Some(existing) if existing != candidate => Some((existing, candidate)),
                _ => None,
            }
        })
        .expect("expected a coarse-slot collision within a reasonably sized sample");

    shard.put(&a, 3).unwrap();
    shard.put(&b, 3).unwrap();

    assert!(shard.lookup(&a).is_found());
    assert!(shard.lookup(&b).is_found());
    assert_eq!(stats.snapshot().collisions, 1);
}

#[test]
fn clean_save_then_load_round_trips_all_names() {
    let dir = tempfile::tempdir().unwrap();
    let volume_dir = dir.path().join("volume");
    let state_path = dir.path().join("state.json");
    let geometry = Arc::new(Geometry::dense(16, 16));
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(&volume_dir, *geometry).unwrap());

    let names: Vec<ChunkName> = (0..40u8).map(name).collect();

    {
        let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
        let mut index = Index::make_index(
            vec![zone],
            Arc::clone(&geometry),
            volume.as_ref(),
            IndexStateStore::new(&state_path),
            LoadType::Create,
            Arc::new(LoadContext::new()),
            false,
        )
        .unwrap();

        for (i, n) in names.iter().enumerate() {
            let mut request = Request::index(*n, RecordMetadata::new(vec![i as u8]));
            index.zones[0].dispatch(&mut request).unwrap();
            if (i + 1) % 10 == 0 {
                index.zones[0].advance_chapter().unwrap();
            }
        }

        let writer = Arc::new(ChapterWriter::new(Arc::clone(&volume)));
        index.save_index(&[writer]).unwrap();
    }

    let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
    let mut reloaded = Index::make_index(
        vec![zone],
        Arc::clone(&geometry),
        volume.as_ref(),
        IndexStateStore::new(&state_path),
        LoadType::Load,
        Arc::new(LoadContext::new()),
        true,
    )
    .unwrap();

    for n in &names {
        let mut query = Request::query(*n);
        reloaded.zones[0].dispatch(&mut query).unwrap();
        assert_ne!(query.location, Location::Unavailable, "expected {:?} to be found after reload", n);
    }
}

#[test]
fn dirty_shutdown_recovers_via_replay() {
    let dir = tempfile::tempdir().unwrap();
    let volume_dir = dir.path().join("volume");
    let state_path = dir.path().join("state.json");
    let geometry = Arc::new(Geometry::dense(16, 16));
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(&volume_dir, *geometry).unwrap());

    // 30 names, fully closing 3 chapters (0, 1, 2) so every name is durable
    // on the volume; the 4th, still-open chapter is never reached.
    let names: Vec<ChunkName> = (0..30u8).map(name).collect();
    {
        let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
        let mut index = Index::make_index(
            vec![zone],
            Arc::clone(&geometry),
            volume.as_ref(),
            IndexStateStore::new(&state_path),
            LoadType::Create,
            Arc::new(LoadContext::new()),
            false,
        )
        .unwrap();

        for (i, n) in names.iter().enumerate() {
            let mut request = Request::index(*n, RecordMetadata::new(vec![i as u8]));
            index.zones[0].dispatch(&mut request).unwrap();
            if (i + 1) % 10 == 0 {
                index.zones[0].advance_chapter().unwrap();
            }
        }
        // Persist lifecycle metadata as a dirty checkpoint (no clean
        // save_index, so the open chapter was never durably recorded) —
        // this is what a crash between chapter closes leaves behind.
        IndexStateStore::new(&state_path)
            .save(&dedup_index::PersistedState {
                oldest_vcn: 0,
                newest_vcn: 3,
                last_checkpoint: dedup_index::NO_LAST_CHECKPOINT,
                has_open_chapter: false,
            })
            .unwrap();
    }

    let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
    let reloaded = Index::make_index(
        vec![zone],
        geometry,
        volume.as_ref(),
        IndexStateStore::new(&state_path),
        LoadType::Load,
        Arc::new(LoadContext::new()),
        true,
    )
    .unwrap();

    let mut reloaded = reloaded;
    for n in &names {
        let mut query = Request::query(*n);
        reloaded.zones[0].dispatch(&mut query).unwrap();
        assert_ne!(query.location, Location::Unavailable, "expected {:?} to survive replay", n);
    }
}

#[test]
fn rebuild_recovers_from_a_corrupt_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let volume_dir = dir.path().join("volume");
    let state_path = dir.path().join("state.json");
    let geometry = Arc::new(Geometry::dense(16, 16));
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(&volume_dir, *geometry).unwrap());

    let names: Vec<ChunkName> = (0..20u8).map(name).collect();
    {
        let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
        let mut index = Index::make_index(
            vec![zone],
            Arc::clone(&geometry),
            volume.as_ref(),
            IndexStateStore::new(&state_path),
            LoadType::Create,
            Arc::new(LoadContext::new()),
            false,
        )
        .unwrap();

        for (i, n) in names.iter().enumerate() {
            let mut request = Request::index(*n, RecordMetadata::new(vec![i as u8]));
            index.zones[0].dispatch(&mut request).unwrap();
            if (i + 1) % 10 == 0 {
                index.zones[0].advance_chapter().unwrap();
            }
        }
    }

    // Simulate a corrupted state blob: present on disk, but not valid JSON.
    std::fs::write(&state_path, b"not json").unwrap();

    let zone = single_zone(Arc::clone(&geometry), Arc::clone(&volume));
    let mut rebuilt = Index::make_index(
        vec![zone],
        geometry,
        volume.as_ref(),
        IndexStateStore::new(&state_path),
        LoadType::Rebuild,
        Arc::new(LoadContext::new()),
        true,
    )
    .unwrap();

    for n in &names {
        let mut query = Request::query(*n);
        rebuilt.zones[0].dispatch(&mut query).unwrap();
        assert_ne!(query.location, Location::Unavailable, "expected {:?} to survive rebuild", n);
    }
}

#[test]
fn suspend_and_resume_round_trips_during_replay() {
    let ctx = Arc::new(LoadContext::new());
    ctx.request_suspend();

    let worker_ctx = Arc::clone(&ctx);
    let worker = std::thread::spawn(move || worker_ctx.check_for_suspend());

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(ctx.status(), dedup_index::LoadStatus::Suspended);

    ctx.resume();
    assert!(!worker.join().unwrap());
}
