//! tidegrid - headless projected-grid ocean simulator
//!
//! Runs the simulator for a fixed number of frames from a still camera,
//! prints what each frame did and optionally writes a heightmap.

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{info, warn};

use tidegrid::camera::Camera;
use tidegrid::cli::Args;
use tidegrid::grid::{FrameOutcome, ProjectedGrid};
use tidegrid::noise::NoiseModule;

/// Per-run counters
#[derive(Debug, Default)]
struct Summary {
    regenerated: u32,
    animated: u32,
    skipped: u32,
    aborted: u32,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tidegrid: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = args.load_options()?;
    if let Some(path) = &args.write_config {
        config.save(path)?;
        info!("Options written to {}", path.display());
    }
    let mut grid = ProjectedGrid::new(
        config.grid,
        NoiseModule::with_waves(config.noise),
        args.water_level,
    )
    .with_locator(args.locator());
    if args.host_only {
        grid = grid.host_only();
    }
    grid.create()?;

    for wave in &args.waves {
        grid.add_wave(wave.0)?;
    }

    let camera = args.camera();
    let mut summary = Summary::default();
    for frame in 0..args.frames {
        match grid.update(args.dt, &camera) {
            Ok(FrameOutcome::Regenerated) => summary.regenerated += 1,
            Ok(FrameOutcome::Animated) => summary.animated += 1,
            Ok(FrameOutcome::Skipped) => summary.skipped += 1,
            Err(e) if e.is_frame_local() => {
                warn!("Frame {frame}: {e}");
                summary.aborted += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!(
        "{} frames on {}: {} regenerated, {} animated, {} skipped, {} aborted",
        args.frames,
        if grid.is_accelerated() { "accelerator" } else { "host" },
        summary.regenerated,
        summary.animated,
        summary.skipped,
        summary.aborted
    );
    print_mesh_stats(&grid);

    if let Some(path) = &args.heightmap {
        write_heightmap(&grid, &camera, path, args.heightmap_size, args.heightmap_spacing)?;
        println!("Heightmap written to {}", path.display());
    }

    grid.remove();
    Ok(())
}

fn print_mesh_stats(grid: &ProjectedGrid) {
    let vertices = grid.vertices();
    if vertices.is_empty() {
        println!("No mesh downloaded");
        return;
    }
    let origin = grid.mesh_origin();
    let (low, high) = vertices
        .iter()
        .map(|v| origin.y + v.position[1])
        .fold((f32::MAX, f32::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
    println!(
        "Mesh: {} vertices, elevation [{low:.3}, {high:.3}], origin ({:.1}, {:.1}, {:.1}), {} device bytes, underwater: {}",
        vertices.len(),
        origin.x,
        origin.y,
        origin.z,
        grid.allocated_bytes(),
        grid.is_underwater()
    );
}

/// Grayscale PNG of host heights in a square centred under the camera.
fn write_heightmap(
    grid: &ProjectedGrid,
    camera: &Camera,
    path: &Path,
    size: u32,
    spacing: f32,
) -> Result<(), Box<dyn Error>> {
    let size = size.max(1);
    let half = size as f32 * spacing / 2.0;
    let mut heights = Vec::with_capacity((size * size) as usize);
    for row in 0..size {
        for col in 0..size {
            let x = camera.position.x - half + col as f32 * spacing;
            let z = camera.position.z - half + row as f32 * spacing;
            heights.push(grid.get_height(x, z));
        }
    }

    let (low, high) = heights
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)));
    let range = (high - low).max(f32::EPSILON);
    let pixels: Vec<u8> = heights
        .iter()
        .map(|h| ((h - low) / range * 255.0).round() as u8)
        .collect();

    info!("Heightmap range [{low:.3}, {high:.3}] over {size}x{size} pixels");
    image::save_buffer(path, &pixels, size, size, image::ColorType::L8)?;
    Ok(())
}
