mod common;

use std::sync::Arc;

use common::*;
use mdlcache::cache::{DataKind, FlushFlags};
use mdlcache::cache::virtual_model::GroupSource;
use mdlcache::settings::CacheSettings;

fn player_with_gestures(fs: &mdlcache::io::memory::MemoryFileSystem) {
    install(
        fs,
        "models/player.mdl",
        studio("models/player.mdl", 1)
            .sequence(AUTOPLAY, 5)
            .include("gestures", "models/player_gestures.mdl"),
    );
    install(
        fs,
        "models/player_gestures.mdl",
        studio("models/player_gestures.mdl", 2)
            .sequence(0, 5)
            .sequence(AUTOPLAY, 5)
            .include("shared", "models/player_shared.mdl"),
    );
    install(
        fs,
        "models/player_shared.mdl",
        studio("models/player_shared.mdl", 3).sequence(AUTOPLAY, 5),
    );
    fs.remove("models/player.phy");
}

#[test_log::test]
fn includes_are_flattened_into_one_sequence_list() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    player_with_gestures(&fs);
    let cache = cache(&fs);
    let player = cache.find_model("models/player.mdl");

    let virtual_model = cache
        .get_virtual_model(player)
        .ok_or_else(|| anyhow::anyhow!("no virtual model"))?;
    assert_eq!(virtual_model.groups().len(), 3);
    assert_eq!(virtual_model.owner(), player);
    assert_eq!(virtual_model.num_sequences(), 2 + 3 + 2);

    let gestures = virtual_model.group(1).ok_or_else(|| anyhow::anyhow!("no group 1"))?;
    assert_eq!(gestures.first_sequence, 2);
    assert!(matches!(&gestures.source, GroupSource::Included { label, .. } if label == "gestures"));
    assert_eq!(virtual_model.group(2).map(|group| group.first_sequence), Some(5));

    // Owner sequence 1, gestures sequence 2 and shared sequence 1.
    assert_eq!(cache.get_autoplay_list(player), vec![1, 4, 6]);
    assert!(cache.is_data_loaded(player, DataKind::VirtualModel));

    let again = cache
        .get_virtual_model(player)
        .ok_or_else(|| anyhow::anyhow!("no virtual model"))?;
    assert!(Arc::ptr_eq(&virtual_model, &again));
    Ok(())
}

#[test_log::test]
fn models_without_includes_cache_their_own_autoplay_list() {
    let fs = memory_fs();
    install(
        &fs,
        "models/fan.mdl",
        studio("models/fan.mdl", 1).sequence(AUTOPLAY, 30),
    );
    let cache = cache(&fs);
    let fan = cache.find_model("models/fan.mdl");

    assert!(cache.get_virtual_model(fan).is_none());
    assert!(cache.get_studio_header(fan).is_ok());
    assert_eq!(cache.get_autoplay_list(fan), vec![1]);

    cache.flush_model(fan, FlushFlags::AUTOPLAY);
    assert!(cache.get_autoplay_list(fan).is_empty());
}

#[test_log::test]
fn included_models_are_held_by_the_graph() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    player_with_gestures(&fs);
    let cache = cache(&fs);
    let player = cache.find_model("models/player.mdl");

    let virtual_model = cache
        .get_virtual_model(player)
        .ok_or_else(|| anyhow::anyhow!("no virtual model"))?;
    let included: Vec<_> = virtual_model.included().map(|group| group.handle).collect();
    assert_eq!(included.len(), 2);
    for handle in &included {
        assert_eq!(cache.get_ref(*handle), 1);
    }

    cache.flush_model(player, FlushFlags::VIRTUAL_MODEL);
    assert!(!cache.is_data_loaded(player, DataKind::VirtualModel));
    for handle in included {
        assert!(!cache.is_valid(handle));
    }
    assert!(cache.is_valid(player));
    Ok(())
}

#[test_log::test]
fn collision_is_borrowed_from_an_included_model() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    player_with_gestures(&fs);
    let cache = cache(&fs);
    let player = cache.find_model("models/player.mdl");

    let collision = cache
        .get_collision(player)
        .ok_or_else(|| anyhow::anyhow!("no shared collision"))?;
    assert_eq!(fs.read_count("models/player.phy"), 0);
    assert_eq!(fs.read_count("models/player_gestures.phy"), 1);

    let gestures = cache.find_model("models/player_gestures.mdl");
    let owned = cache
        .get_collision(gestures)
        .ok_or_else(|| anyhow::anyhow!("no collision"))?;
    assert!(Arc::ptr_eq(&collision, &owned));
    assert_eq!(cache.get_collision_size(player), cache.get_collision_size(gestures));

    // Dropping the borrowed set leaves the owner untouched.
    cache.flush_model(player, FlushFlags::COLLISION);
    assert!(cache.is_data_loaded(gestures, DataKind::Collision));
    assert_eq!(cache.get_collision_size(player), None);
    cache.release(gestures);
    Ok(())
}

#[test_log::test]
fn force_data_pulls_in_includes_and_blocks() {
    let fs = memory_fs();
    player_with_gestures(&fs);
    let cache = cache_with(
        &fs,
        CacheSettings {
            force_data: true,
            ..CacheSettings::default()
        },
    );
    let player = cache.find_model("models/player.mdl");

    assert!(cache.get_studio_header(player).is_ok());
    assert!(cache.is_data_loaded(player, DataKind::VirtualModel));
    assert_eq!(fs.read_count("models/player_shared.mdl"), 1);
}
