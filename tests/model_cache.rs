mod common;

use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use common::*;
use mdlcache::cache::{CacheError, CacheNotify, DataKind, ERROR_MODEL_NAME, FlushFlags, ModelCache, ModelHandle};
use mdlcache::settings::CacheSettings;
use mdlcache_files::builders::VertexFileBuilder;

#[test_log::test]
fn missing_model_falls_back_to_the_error_model() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, ERROR_MODEL_NAME, 7);
    let cache = cache(&fs);

    let handle = cache.find_model("models/props/missing.mdl");
    let header = cache.get_studio_header(handle)?;

    assert_eq!(header.name, ERROR_MODEL_NAME);
    assert!(cache.is_error_model(handle));
    assert_eq!(cache.get_actual_model_name(handle).as_deref(), Some(ERROR_MODEL_NAME));
    assert_eq!(cache.get_model_name(handle).as_deref(), Some("models/props/missing.mdl"));

    // Companion files come from the fallback as well.
    assert!(cache.get_vertex_data(handle).is_some());
    assert_eq!(fs.read_count("models/error.vvd"), 1);

    cache.reset_error_model_status(handle);
    assert!(!cache.is_error_model(handle));
    Ok(())
}

#[test_log::test]
fn missing_model_without_fallback_is_a_hard_error() {
    let fs = memory_fs();
    let cache = cache(&fs);

    let handle = cache.find_model("models/props/missing.mdl");
    assert_eq!(
        cache.get_studio_header(handle).err(),
        Some(CacheError::Unloadable {
            name: "models/props/missing.mdl".to_string()
        })
    );
    assert!(cache.get_vertex_data(handle).is_none());
    assert!(cache.get_collision(handle).is_none());
}

#[test_log::test]
fn matched_releases_invalidate_the_handle() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);

    let handle = cache.find_model("models/crate.mdl");
    assert_eq!(cache.find_model("MODELS\\crate.mdl"), handle);
    assert_eq!(cache.get_ref(handle), 2);
    assert_eq!(cache.add_ref(handle), 3);
    cache.get_studio_header(handle)?;

    assert_eq!(cache.release(handle), 2);
    assert_eq!(cache.release(handle), 1);
    assert!(cache.is_valid(handle));
    assert_eq!(cache.release(handle), 0);

    assert!(!cache.is_valid(handle));
    assert_eq!(cache.get_studio_header(handle).err(), Some(CacheError::InvalidHandle { handle }));
    assert_eq!(cache.section_status(DataKind::StudioHeader).items, 0);

    let recreated = cache.find_model("models/crate.mdl");
    assert_ne!(recreated, handle);
    assert_eq!(recreated.index(), handle.index());
    Ok(())
}

#[test_log::test]
fn model_without_body_parts_has_no_vertexes_or_mesh() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install(&fs, "models/trigger.mdl", studio("models/trigger.mdl", 3).body_parts(0));
    let cache = cache(&fs);
    let handle = cache.find_model("models/trigger.mdl");

    assert!(cache.get_vertex_data(handle).is_none());
    assert!(cache.get_hardware_data(handle).is_none());
    assert!(!cache.is_data_loaded(handle, DataKind::Vertexes));
    assert_eq!(fs.read_count("models/trigger.vvd"), 0);
    assert_eq!(fs.read_count(&format!("models/trigger{}", VTX)), 0);

    // Absent stays absent without further I/O.
    assert!(cache.get_vertex_data(handle).is_none());
    assert_eq!(fs.read_count("models/trigger.vvd"), 0);
    assert!(cache.get_studio_header(handle).is_ok());
    Ok(())
}

#[test_log::test]
fn vertex_checksum_mismatch_only_disables_vertexes_and_mesh() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 10);
    fs.insert("models/crate.vvd", VertexFileBuilder::new(11, vertices(4)).build());
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");

    assert!(cache.get_vertex_data(handle).is_none());
    assert!(cache.get_hardware_data(handle).is_none());
    assert_eq!(fs.read_count(&format!("models/crate{}", VTX)), 0);

    assert_eq!(cache.get_studio_header(handle)?.checksum, 10);
    assert!(cache.get_collision(handle).is_some());

    // Known missing until flushed.
    assert!(cache.get_vertex_data(handle).is_none());
    assert_eq!(fs.read_count("models/crate.vvd"), 1);

    fs.insert("models/crate.vvd", VertexFileBuilder::new(10, vertices(4)).build());
    cache.flush_model(handle, FlushFlags::VERTEXES | FlushFlags::HARDWARE_MESH);
    assert!(cache.get_hardware_data(handle).is_some());
    Ok(())
}

#[test_log::test]
fn repeated_gets_share_the_cached_data() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");

    let first_header = cache.get_studio_header(handle)?;
    let second_header = cache.get_studio_header(handle)?;
    assert!(Arc::ptr_eq(&first_header, &second_header));

    let first = cache.get_vertex_data(handle).ok_or_else(|| anyhow::anyhow!("no vertexes"))?;
    let second = cache.get_vertex_data(handle).ok_or_else(|| anyhow::anyhow!("no vertexes"))?;
    assert!(Arc::ptr_eq(&first, &second));

    let mesh = cache.get_hardware_data(handle);
    assert!(mesh.is_some());
    assert_eq!(mesh.map(|mesh| mesh.num_meshes), Some(1));
    assert!(cache.get_hardware_data(handle).is_some());

    assert_eq!(fs.read_count("models/crate.mdl"), 1);
    assert_eq!(fs.read_count("models/crate.vvd"), 1);
    assert_eq!(fs.read_count(&format!("models/crate{}", VTX)), 1);
    Ok(())
}

#[test_log::test]
fn flushed_data_reloads_identically() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");

    let before = cache.get_vertex_data(handle).ok_or_else(|| anyhow::anyhow!("no vertexes"))?;
    cache.flush_model(handle, FlushFlags::VERTEXES);
    assert!(!cache.is_data_loaded(handle, DataKind::Vertexes));
    assert!(fs.unloaded_paths().contains(&"models/crate.vvd".to_string()));

    let after = cache.get_vertex_data(handle).ok_or_else(|| anyhow::anyhow!("no vertexes"))?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);
    assert_eq!(fs.read_count("models/crate.vvd"), 2);

    let header = cache.get_studio_header(handle)?;
    cache.flush_model(handle, FlushFlags::STUDIO_HEADER);
    assert!(!cache.is_data_loaded(handle, DataKind::StudioHeader));
    assert_eq!(*cache.get_studio_header(handle)?, *header);
    Ok(())
}

#[test_log::test]
fn mesh_build_thins_vertexes_of_models_without_flexes() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/rigid.mdl", 1);
    install(&fs, "models/face.mdl", studio("models/face.mdl", 2).flexes(4));
    let cache = cache_with(
        &fs,
        CacheSettings {
            compressed_vertexes: true,
            ..CacheSettings::default()
        },
    );

    let recorder = Arc::new(Recorder::default());
    cache.set_cache_notify(Some(recorder.clone()));

    let rigid = cache.find_model("models/rigid.mdl");
    assert!(cache.get_hardware_data(rigid).is_some());

    // The replace reports the full form as unloaded; the thin form arrives silently.
    let events = recorder.events();
    assert!(events.contains(&Event::Unloaded(DataKind::Vertexes, rigid)));
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == Event::Loaded(DataKind::Vertexes, rigid))
            .count(),
        1
    );
    assert!(cache.is_data_loaded(rigid, DataKind::Vertexes));
    let vertexes = cache.get_vertex_data(rigid).ok_or_else(|| anyhow::anyhow!("no vertexes"))?;
    assert!(vertexes.is_thin());
    assert_eq!(vertexes.vertex_count(), 8);
    assert_eq!(vertexes.checksum(), 1);
    assert_eq!(cache.section_status(DataKind::Vertexes).items, 2);

    let face = cache.find_model("models/face.mdl");
    assert!(cache.get_hardware_data(face).is_some());
    assert!(!cache.get_vertex_data(face).is_some_and(|vertexes| vertexes.is_thin()));
    Ok(())
}

#[test_log::test]
fn device_loss_drops_and_restores_meshes() {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");
    assert!(cache.get_hardware_data(handle).is_some());

    cache.release_material_system_objects();
    assert!(!cache.is_data_loaded(handle, DataKind::HardwareMesh));
    assert!(cache.get_hardware_data(handle).is_none());
    assert!(cache.is_data_loaded(handle, DataKind::Vertexes));

    cache.restore_material_system_objects(false);
    assert!(cache.is_data_loaded(handle, DataKind::HardwareMesh));
    assert_eq!(fs.read_count("models/crate.vvd"), 1);

    cache.release_material_system_objects();
    cache.restore_material_system_objects(true);
    assert!(cache.is_data_loaded(handle, DataKind::HardwareMesh));
    assert_eq!(fs.read_count("models/crate.vvd"), 2);
}

#[test_log::test]
fn diagnostic_switches_hide_data() {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");

    cache.update_settings(|settings| settings.test_mesh_not_available = true);
    assert!(cache.get_hardware_data(handle).is_none());
    assert!(cache.get_vertex_data(handle).is_some());

    cache.update_settings(|settings| {
        settings.test_mesh_not_available = false;
        settings.test_not_available = true;
    });
    assert!(cache.get_vertex_data(handle).is_none());
    assert!(cache.get_collision(handle).is_none());
    assert!(cache.get_anim_block(handle, 1).is_none());

    cache.update_settings(|settings| settings.test_not_available = false);
    assert!(cache.get_hardware_data(handle).is_some());
}

#[test_log::test]
fn notify_mirrors_loads_and_unloads() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let recorder = Arc::new(Recorder::default());
    cache.set_cache_notify(Some(recorder.clone()));

    let handle = cache.find_model("models/crate.mdl");
    cache.get_hardware_data(handle);
    cache.get_collision(handle);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Loaded(DataKind::StudioHeader, handle),
            Event::Loaded(DataKind::Vertexes, handle),
            Event::Loaded(DataKind::HardwareMesh, handle),
            Event::Loaded(DataKind::Collision, handle),
        ]
    );

    cache.release(handle);
    let unloaded: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::Unloaded(..)))
        .collect();
    assert_eq!(
        unloaded,
        vec![
            Event::Unloaded(DataKind::HardwareMesh, handle),
            Event::Unloaded(DataKind::Collision, handle),
            Event::Unloaded(DataKind::StudioHeader, handle),
            Event::Unloaded(DataKind::Vertexes, handle),
        ]
    );
    Ok(())
}

#[test_log::test]
fn user_data_and_shutdown() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/crate.mdl", 1);
    let cache = cache(&fs);
    let handle = cache.find_model("models/crate.mdl");

    cache.set_user_data(handle, Some(Arc::new(42u32)));
    let user_data = cache.get_user_data(handle).ok_or_else(|| anyhow::anyhow!("no user data"))?;
    assert_eq!(user_data.downcast_ref::<u32>(), Some(&42));

    cache.get_hardware_data(handle);
    cache.shutdown();
    assert!(!cache.is_valid(handle));
    assert_eq!(cache.get_model_name(handle), None);
    assert!(cache.get_studio_header(handle).is_err());
    assert_eq!(cache.section_status(DataKind::HardwareMesh).items, 0);
    Ok(())
}

/// Reads a companion model whenever the trigger model's header arrives.
#[derive(Default)]
struct Companion {
    link: Mutex<Option<(Weak<ModelCache>, ModelHandle, ModelHandle)>>,
    loaded: Mutex<Vec<String>>,
}

impl CacheNotify for Companion {
    fn on_data_loaded(&self, kind: DataKind, handle: ModelHandle) {
        let link = self.link.lock().ok().and_then(|link| link.clone());
        let Some((cache, trigger, companion)) = link else {
            return;
        };
        if kind != DataKind::StudioHeader || handle != trigger {
            return;
        }
        let Some(cache) = cache.upgrade() else {
            return;
        };

        for handle in [companion, trigger] {
            if let Ok(header) = cache.get_studio_header(handle) {
                if let Ok(mut loaded) = self.loaded.lock() {
                    loaded.push(header.name.clone());
                }
            }
        }
    }
}

#[test_log::test]
fn notify_callbacks_may_load_other_headers() -> Result<(), anyhow::Error> {
    let fs = memory_fs();
    install_model(&fs, "models/a.mdl", 1);
    install_model(&fs, "models/b.mdl", 2);
    let cache = cache(&fs);
    let a = cache.find_model("models/a.mdl");
    let b = cache.find_model("models/b.mdl");

    let companion = Arc::new(Companion::default());
    if let Ok(mut link) = companion.link.lock() {
        *link = Some((Arc::downgrade(&cache), a, b));
    }
    cache.set_cache_notify(Some(companion.clone()));

    let (sender, receiver) = channel();
    let loader = cache.clone();
    std::thread::spawn(move || {
        let _ = sender.send(loader.get_studio_header(a).map(|header| header.name.clone()));
    });

    let name = receiver.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(name?, "models/a.mdl");
    assert!(cache.is_data_loaded(b, DataKind::StudioHeader));
    assert_eq!(
        companion.loaded.lock().map(|loaded| loaded.clone()).unwrap_or_default(),
        vec!["models/b.mdl".to_string(), "models/a.mdl".to_string()]
    );
    assert_eq!(fs.read_count("models/a.mdl"), 1);
    Ok(())
}
