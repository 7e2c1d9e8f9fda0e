use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use mdlcache::cache::{DataKind, ModelCache};
use mdlcache::io::fs::loader::DirectoryFileSystem;
use mdlcache::io::queued::QueuedLoader;
use mdlcache::io::queued::batch::BatchLoader;
use mdlcache::settings::{CliArgs, OperationMode};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    #[cfg(feature = "tracy")]
    tracy_client::Client::start();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let file_system = Arc::new(
        DirectoryFileSystem::from_data_dir(Path::new(&args.data_dir))
            .with_context(|| format!("Cannot open data directory {}", args.data_dir))?,
    );

    let cache = ModelCache::builder(file_system.clone())
        .with_settings(args.cache_settings()?)
        .with_budgets(args.section_budgets()?)
        .build();

    match &args.operation_mode {
        OperationMode::Inspect { model } => inspect(&cache, model)?,
        OperationMode::Preload { models, workers } => {
            let loader = Arc::new(BatchLoader::new(file_system, *workers)?);
            let queued: Arc<dyn QueuedLoader> = loader.clone();
            cache.set_queued_loader(Some(queued));
            preload(&cache, &loader, models);
        }
    }

    cache.shutdown();
    Ok(())
}

fn inspect(cache: &ModelCache, model: &str) -> anyhow::Result<()> {
    let handle = cache.find_model(model);
    let header = cache.get_studio_header(handle)?;

    if cache.is_error_model(handle) {
        warn!("{} is missing, showing {} instead", model, header.name);
    }

    println!("{} ({})", header.name, handle);
    println!("  version       {}", header.version);
    println!("  checksum      {:#010x}", header.checksum);
    println!("  body parts    {}", header.num_body_parts);
    println!("  sequences     {}", header.sequences.len());
    println!("  autoplay      {:?}", cache.get_autoplay_list(handle));
    println!("  anim blocks   {}", header.num_anim_blocks());

    if let Some(virtual_model) = cache.get_virtual_model(handle) {
        println!("  all sequences {}", virtual_model.num_sequences());
        for group in virtual_model.included() {
            let name = cache.get_model_name(group.handle).unwrap_or_default();
            println!("  includes      {} (sequences from {})", name, group.first_sequence);
        }
    }

    cache.touch_all_data(handle);
    let collision = cache.get_collision(handle);

    match cache.get_vertex_data(handle) {
        Some(vertexes) => println!("  vertexes      {} ({} bytes)", vertexes.vertex_count(), vertexes.memory_size()),
        None => println!("  vertexes      -"),
    }
    match cache.get_hardware_data(handle) {
        Some(mesh) => println!("  meshes        {} at lod {} of {}", mesh.num_meshes, mesh.root_lod, mesh.num_lods),
        None => println!("  meshes        -"),
    }
    match collision {
        Some(collision) => println!("  solids        {}", collision.solid_count()),
        None => println!("  solids        -"),
    }

    cache.release(handle);
    Ok(())
}

fn preload(cache: &ModelCache, loader: &BatchLoader, models: &[String]) {
    let handles: Vec<_> = models.iter().map(|model| cache.find_model(model)).collect();

    loader.begin_batch();
    let queued = handles.iter().filter(|handle| cache.preload_model(**handle)).count();
    let jobs = loader.end_batch();
    info!("Queued {} of {} models ({} files)", queued, handles.len(), jobs);

    loader.wait_idle();
    cache.mark_frame();

    for handle in &handles {
        let name = cache.get_model_name(*handle).unwrap_or_default();
        println!(
            "{:<40} header {:<5} vertexes {:<5} mesh {:<5} collision {}",
            name,
            cache.is_data_loaded(*handle, DataKind::StudioHeader),
            cache.is_data_loaded(*handle, DataKind::Vertexes),
            cache.is_data_loaded(*handle, DataKind::HardwareMesh),
            cache.is_data_loaded(*handle, DataKind::Collision),
        );
    }

    for (section, kind) in [
        ("model", DataKind::StudioHeader),
        ("mesh", DataKind::HardwareMesh),
        ("anim", DataKind::AnimBlock),
    ] {
        let status = cache.section_status(kind);
        println!(
            "{:<6} {} items, {} bytes ({} locked)",
            section, status.items, status.bytes, status.locked_bytes
        );
    }

    for handle in handles {
        cache.release(handle);
    }
}
