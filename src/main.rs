use std::path::PathBuf;

use clap::Parser;

mod datatypes;
mod error;
mod fields;
mod geometry;
mod heating;
mod mesher;
mod params;
mod post_processor;
mod solver;

use error::HeaterError;
use heating::HeatSources;
use mesher::MesherSettings;
use params::{DriveSettings, HeaterGeometry, MaterialTable};
use post_processor::RunSummary;
use solver::SolverSettings;

/// Steady-state temperature of a thermo-optic phase shifter cross-section
#[derive(Parser, Debug)]
#[command(name = "tops-thermal", version)]
struct Cli {
    /// Gmsh executable
    #[arg(long, default_value = "gmsh")]
    gmsh: String,

    /// Directory for the mesh, csv and summary outputs
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Keep the generated .msh file
    #[arg(long)]
    keep_mesh: bool,

    /// Skip the python plot window
    #[arg(long)]
    no_plot: bool,

    /// Path to the python plotter script
    #[arg(long)]
    plotter: Option<PathBuf>,

    /// Log every conjugate gradient iteration
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: Cli) -> Result<(), HeaterError> {
    std::fs::create_dir_all(&cli.output_dir).map_err(|err| {
        HeaterError::Input(format!(
            "Unable to create output directory {}: {err}",
            cli.output_dir.display()
        ))
    })?;

    let geometry = geometry::build_regions(&HeaterGeometry::default());
    geometry.validate()?;

    let mesher_settings = MesherSettings {
        gmsh: cli.gmsh.clone(),
        mesh_file: cli.output_dir.join("mesh.msh"),
        keep_mesh: cli.keep_mesh,
    };
    let mut mesh = mesher::run(
        &geometry,
        &params::default_resolutions(),
        params::DEFAULT_RESOLUTION_MAX,
        &mesher_settings,
    )?;

    let conductivity = fields::conductivity_p0(&mesh, &MaterialTable::default())?;

    let drive = DriveSettings::default();
    let heater_area = geometry.area_of(&drive.heater_regions)?;
    let current = heating::drive_current(
        drive.power,
        drive.specific_conductivity,
        heater_area,
        drive.resistivity,
    )?;
    let density = heating::current_density(current, heater_area);
    println!("{}", current);
    println!("{}", density);

    let sources = HeatSources::uniform(&drive.heater_regions, drive.specific_conductivity, density);
    let dissipated_power = heating::dissipated_power(&mesh, &sources)?;

    let solver_settings = SolverSettings {
        verbose: cli.verbose,
        ..SolverSettings::default()
    };
    let solution = solver::run(&mut mesh, &conductivity, &sources, &solver_settings)?;
    println!(
        "info: peak temperature rise {:.4} K after {} iterations",
        solution.max_temperature, solution.iterations
    );

    let summary = RunSummary {
        drive_current: current,
        current_density: density,
        dissipated_power,
        iterations: solution.iterations,
        max_temperature: solution.max_temperature,
        regions: post_processor::region_summary(&mesh)?,
    };
    post_processor::write_summary(&cli.output_dir.join("summary.json"), &summary, &mesh)?;

    let nodes_output = cli.output_dir.join("nodes.csv");
    let elements_output = cli.output_dir.join("elements.csv");
    post_processor::csv_output(&mesh, &conductivity, &nodes_output, &elements_output)?;

    if !cli.no_plot {
        let plotter = cli.plotter.unwrap_or_else(post_processor::locate_plotter);
        post_processor::pyplot(&nodes_output, &elements_output, &plotter)?;
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1)
    }
}
