//! Demons Registration Example
//!
//! Registers a synthetic moving image (a shifted and slightly stretched
//! blob) to a fixed blob with a three-level diffeomorphic demons run.
//! An optional JSON file overrides the default configuration.
//!
//! Usage:
//!   cargo run --example demons_registration [config.json]

use std::sync::Arc;

use burn_ndarray::NdArray;
use varreg_core::image::ImageGrid;
use varreg_core::{Image, ImageBuffer, Point, Spacing};
use varreg_registration::{
    LoggingObserver, MultiResolutionRegistration, RegistrationConfig, RegistrationSchedule,
    SearchSpace, StopCriterion, StopCriterionConfig,
};

type Backend = NdArray<f32>;

fn synthetic(grid: &ImageGrid<2>, center: [f64; 2], radii: [f64; 2]) -> anyhow::Result<ImageBuffer<2>> {
    let values = (0..grid.num_voxels())
        .map(|i| {
            let index = grid.multi_index(i).map(|v| v as f64);
            let p = grid.index_to_physical(&index);
            let dx = (p[0] - center[0]) / radii[0];
            let dy = (p[1] - center[1]) / radii[1];
            (100.0 * (-(dx * dx + dy * dy)).exp()) as f32
        })
        .collect();
    Ok(ImageBuffer::new(grid.clone(), values)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str::<RegistrationConfig>(&text)?
        }
        None => RegistrationConfig::default().with_search_space(SearchSpace::Diffeomorphic),
    };
    config.validate()?;
    println!("Configuration:\n{}", serde_json::to_string_pretty(&config)?);

    let device = Default::default();
    let grid = ImageGrid::new(
        [64, 48],
        Point::origin(),
        Spacing::new([1.0, 1.25]),
        Default::default(),
    );
    let fixed = synthetic(&grid, [32.0, 30.0], [10.0, 8.0])?;
    let moving = synthetic(&grid, [35.0, 28.0], [11.0, 8.0])?;
    let fixed = Image::<Backend, 2>::from_buffer(&fixed, &device);
    let moving = Image::<Backend, 2>::from_buffer(&moving, &device);

    let schedule = RegistrationSchedule::new(3).with_iterations(vec![100, 60, 40]);
    let mut registration = MultiResolutionRegistration::from_config(config, schedule)
        .with_fixed_image(fixed.clone())
        .with_moving_image(moving.clone())
        .with_observer(Arc::new(LoggingObserver::new(20)))
        .with_observer(Arc::new(StopCriterion::new(StopCriterionConfig::default())));
    registration.execute()?;

    let warped = registration.warp_moving()?;
    let before = mean_squared_difference(&fixed, &moving)?;
    let after = mean_squared_difference(&fixed, &warped)?;
    println!(
        "Levels run: {} | MSD before: {:.4} | MSD after: {:.4}",
        registration.elapsed_levels(),
        before,
        after
    );

    let field = registration.displacement_buffer()?;
    println!("Max displacement (voxels): {:.4}", field.max_norm_in_voxels());
    Ok(())
}

fn mean_squared_difference(a: &Image<Backend, 2>, b: &Image<Backend, 2>) -> anyhow::Result<f64> {
    let a = a.to_buffer()?;
    let b = b.to_buffer()?;
    let sum: f64 = a
        .values()
        .iter()
        .zip(b.values())
        .map(|(x, y)| ((x - y) as f64).powi(2))
        .sum();
    Ok(sum / a.values().len() as f64)
}
