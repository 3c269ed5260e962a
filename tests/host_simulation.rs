//! Simulator behaviour that runs without an accelerator.

use glam::{Vec2, Vec3};
use tidegrid::noise::{SurfaceNoise, WaveSet};
use tidegrid::solver::{Plane, ProjectedGridSolver};
use tidegrid::{
    Camera, FrameOutcome, GridOptions, NoiseModule, NoiseOptions, ProjectedGrid, SimError, Wave,
};

fn host_grid(grid: GridOptions, noise: NoiseModule) -> ProjectedGrid {
    let mut sim = ProjectedGrid::new(grid, noise, 0.0).host_only();
    sim.create().unwrap();
    sim
}

fn overview_camera() -> Camera {
    Camera::looking_at(Vec3::new(0.0, 80.0, 0.0), Vec3::new(0.0, 0.0, -200.0))
}

fn footprint(sim: &ProjectedGrid) -> Vec<[f32; 2]> {
    sim.vertices()
        .iter()
        .map(|v| [v.position[0], v.position[2]])
        .collect()
}

/// Width of the mesh along x plus its depth along z
fn xz_spread(sim: &ProjectedGrid) -> f32 {
    let (mut lo, mut hi) = ([f32::MAX; 2], [f32::MIN; 2]);
    for [x, z] in footprint(sim) {
        lo = [lo[0].min(x), lo[1].min(z)];
        hi = [hi[0].max(x), hi[1].max(z)];
    }
    (hi[0] - lo[0]) + (hi[1] - lo[1])
}

#[test]
fn test_solver_rejects_camera_facing_up() {
    let mut solver = ProjectedGridSolver::new(Plane::horizontal(0.0));
    let camera = Camera::looking_at(Vec3::new(0.0, 400.0, 0.0), Vec3::new(0.0, 800.0, -1.0));
    assert!(solver.solve(&camera, 0.0, 35.0, 50.0).is_none());
}

#[test]
fn test_flat_surface_without_strength() {
    let grid = GridOptions {
        complexity: 4,
        strength: 0.0,
        ..GridOptions::default()
    };
    let noise = NoiseOptions {
        octaves: 1,
        ..NoiseOptions::default()
    };
    let mut sim = host_grid(grid, NoiseModule::with_waves(noise));

    assert_eq!(sim.update(0.0, &overview_camera()).unwrap(), FrameOutcome::Regenerated);
    assert_eq!(sim.vertices().len(), 16);
    for v in sim.vertices() {
        assert_eq!(v.position[1], 0.0);
        assert!((v.normal[1] - 1.0).abs() < 1e-6);
    }
}

#[test]
fn test_octaves_clamped_and_fixed_after_create() {
    let noise = NoiseOptions {
        octaves: 50,
        ..NoiseOptions::default()
    };
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(noise),
    );
    assert_eq!(sim.noise_options().octaves, 32);

    let mut next = sim.noise_options().clone();
    next.octaves = 3;
    next.falloff = 0.3;
    sim.set_noise_options(next);
    assert_eq!(sim.noise_options().octaves, 32);
    assert_eq!(sim.noise_options().falloff, 0.3);
}

#[test]
fn test_wave_indices_shift_on_remove() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    for amplitude in [1.0, 2.0, 3.0] {
        sim.add_wave(Wave::new(Vec2::Y, amplitude, 5.0, 0.0)).unwrap();
    }
    assert_eq!(sim.wave_count(), 3);

    assert!(sim.remove_wave(2).unwrap());
    assert!(sim.get_wave(2).is_none());
    assert_eq!(sim.get_wave(1).map(|w| w.amplitude), Some(2.0));

    assert!(!sim.remove_wave(7).unwrap());
    assert_eq!(sim.wave_count(), 2);
}

#[test]
fn test_unchanged_waves_are_not_resent() {
    let mut waves = WaveSet::new();
    waves.add(Wave::new(Vec2::X, 1.0, 4.0, 0.0), None).unwrap();
    waves.add(Wave::new(Vec2::Y, 0.5, 2.0, 1.0), None).unwrap();
    let sends = waves.send_count();

    // Two identical frames
    assert!(!waves.sync(None).unwrap());
    assert!(!waves.sync(None).unwrap());
    assert_eq!(waves.send_count(), sends);

    if let Some(wave) = waves.get_mut(1) {
        wave.amplitude = 0.75;
    }
    assert!(waves.is_modified());
    assert!(waves.sync(None).unwrap());
    assert_eq!(waves.send_count(), sends + 1);
}

#[test]
fn test_wave_vanishes_at_origin_at_time_zero() {
    let grid = GridOptions {
        complexity: 4,
        ..GridOptions::default()
    };
    let mut with_wave = host_grid(grid.clone(), NoiseModule::with_waves(NoiseOptions::default()));
    with_wave
        .add_wave(Wave::new(Vec2::X, 4.0, 6.0, 0.0))
        .unwrap();
    let perlin_only = host_grid(grid, NoiseModule::perlin_only(NoiseOptions::default()));

    assert_eq!(with_wave.get_height(0.0, 0.0), perlin_only.get_height(0.0, 0.0));
    let expected = 35.0 * perlin_only.noise().value(0.0, 0.0);
    assert_eq!(perlin_only.get_height(0.0, 0.0), expected);
}

#[test]
fn test_same_options_do_not_rebuild() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 8,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    let camera = overview_camera();
    sim.update(0.1, &camera).unwrap();

    let options = sim.grid_options().clone();
    assert!(!sim.set_grid_options(options).unwrap());
    // Geometry is kept, so the next frame only animates
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Animated);
    assert_eq!(sim.vertices().len(), 64);
}

#[test]
fn test_underwater_flag_follows_surface() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    let surface = sim.get_height(0.0, 0.0);
    let diver = Camera::looking_at(
        Vec3::new(0.0, surface - 5.0, 0.0),
        Vec3::new(0.0, surface - 10.0, -100.0),
    );
    sim.update(0.0, &diver).unwrap();
    assert!(sim.is_underwater());

    sim.update(0.0, &overview_camera()).unwrap();
    assert!(!sim.is_underwater());
}

#[test]
fn test_remove_twice_resets_everything() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    sim.add_wave(Wave::new(Vec2::X, 1.0, 3.0, 0.0)).unwrap();
    sim.remove();
    sim.remove();
    assert!(!sim.is_created());
    assert!(!sim.noise().is_created());
    assert_eq!(sim.wave_count(), 0);
    assert_eq!(sim.allocated_bytes(), 0);
}

#[test]
fn test_toggling_choppy_waves_keeps_footprint() {
    let grid = GridOptions {
        complexity: 8,
        choppy_waves: false,
        ..GridOptions::default()
    };
    let mut sim = host_grid(grid, NoiseModule::with_waves(NoiseOptions::default()));
    let camera = overview_camera();
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Regenerated);
    let plain = footprint(&sim);
    let spread = xz_spread(&sim);
    assert!(spread > 0.0);

    let mut options = sim.grid_options().clone();
    options.choppy_waves = true;
    assert!(!sim.set_grid_options(options.clone()).unwrap());
    // Backup is refilled before the choppy pass reads it
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Regenerated);
    assert!(xz_spread(&sim) > 0.5 * spread);
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Animated);
    assert!(xz_spread(&sim) > 0.5 * spread);
    assert!(sim.vertices().iter().all(|v| v.position[1].is_finite()));

    options.choppy_waves = false;
    assert!(!sim.set_grid_options(options).unwrap());
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Regenerated);
    for (now, before) in footprint(&sim).iter().zip(&plain) {
        assert!((now[0] - before[0]).abs() < 1e-3 && (now[1] - before[1]).abs() < 1e-3);
    }
}

#[test]
fn test_toggling_smoothing_regenerates() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 8,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    let camera = overview_camera();
    sim.update(0.1, &camera).unwrap();

    let mut options = sim.grid_options().clone();
    options.smooth = true;
    assert!(!sim.set_grid_options(options).unwrap());
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Regenerated);
    assert_eq!(sim.update(0.1, &camera).unwrap(), FrameOutcome::Animated);
}

#[test]
fn test_waves_sent_only_when_edited_across_frames() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    sim.add_wave(Wave::new(Vec2::X, 1.0, 4.0, 0.0)).unwrap();
    sim.add_wave(Wave::new(Vec2::Y, 0.5, 2.0, 1.0)).unwrap();
    let sends = |sim: &ProjectedGrid| sim.noise().waves().map_or(0, WaveSet::send_count);
    let before = sends(&sim);

    let camera = overview_camera();
    sim.update(0.1, &camera).unwrap();
    sim.update(0.1, &camera).unwrap();
    assert_eq!(sends(&sim), before);

    if let Some(wave) = sim.wave_mut(1) {
        wave.amplitude = 0.75;
    }
    sim.update(0.1, &camera).unwrap();
    assert_eq!(sends(&sim), before + 1);
    sim.update(0.1, &camera).unwrap();
    assert_eq!(sends(&sim), before + 1);
}

#[test]
fn test_wave_without_period_is_rejected() {
    let mut sim = host_grid(
        GridOptions {
            complexity: 4,
            ..GridOptions::default()
        },
        NoiseModule::with_waves(NoiseOptions::default()),
    );
    for period in [0.0, -3.0] {
        let err = sim
            .add_wave(Wave::new(Vec2::X, 1.0, period, 0.0))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidWave { .. }));
    }
    assert_eq!(sim.wave_count(), 0);

    let camera = overview_camera();
    sim.add_wave(Wave::new(Vec2::X, 1.0, 3.0, 0.0)).unwrap();
    sim.update(0.1, &camera).unwrap();
    let kept = sim.vertices().to_vec();

    if let Some(wave) = sim.wave_mut(0) {
        wave.period = 0.0;
    }
    assert!(matches!(
        sim.update(0.1, &camera),
        Err(SimError::InvalidWave { index: 0, .. })
    ));
    // Last good mesh stays
    assert_eq!(sim.vertices(), &kept[..]);
    assert!(sim.vertices().iter().all(|v| v.position[1].is_finite()));
}
