use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use json::JsonValue;

use crate::{datatypes::Mesh, error::HeaterError, fields::element_area};

/// Temperature statistics of one region
#[derive(Debug, Clone)]
pub struct RegionSummary {
    pub name: String,
    pub area: f64,
    /// Area weighted mean temperature
    pub mean_temperature: f64,
    pub max_temperature: f64,
}

/// Quantities reported at the end of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub drive_current: f64,
    pub current_density: f64,
    pub dissipated_power: f64,
    pub iterations: u64,
    pub max_temperature: f64,
    pub regions: Vec<RegionSummary>,
}

fn create_file(path: &Path) -> Result<BufWriter<File>, HeaterError> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(HeaterError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

fn write_error(path: &Path, err: std::io::Error) -> HeaterError {
    HeaterError::PostProcessor(format!("Failed to write {}: {err}", path.display()))
}

fn node_temperature(mesh: &Mesh, idx: usize) -> Result<f64, HeaterError> {
    mesh.nodes[idx].temperature.ok_or_else(|| {
        HeaterError::PostProcessor(format!("Node {idx} has no temperature; run the solver first"))
    })
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `mesh` - The post-solve mesh
/// * `conductivity` - The per-element thermal conductivity
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    mesh: &Mesh,
    conductivity: &[f64],
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<(), HeaterError> {
    let mut nodes_file = create_file(nodes_output)?;
    let mut elements_file = create_file(elements_output)?;

    // Write nodes
    writeln!(nodes_file, "x,y,temperature").map_err(|e| write_error(nodes_output, e))?;
    for (i, node) in mesh.nodes.iter().enumerate() {
        writeln!(
            nodes_file,
            "{x},{y},{t}",
            x = node.vertex.x,
            y = node.vertex.y,
            t = node_temperature(mesh, i)?,
        )
        .map_err(|e| write_error(nodes_output, e))?;
    }
    nodes_file
        .flush()
        .map_err(|e| write_error(nodes_output, e))?;

    // Write elements
    writeln!(elements_file, "n0,n1,n2,region,conductivity")
        .map_err(|e| write_error(elements_output, e))?;
    for (element, k) in std::iter::zip(&mesh.elements, conductivity) {
        writeln!(
            elements_file,
            "{n0},{n1},{n2},{region},{k}",
            n0 = element.nodes[0],
            n1 = element.nodes[1],
            n2 = element.nodes[2],
            region = mesh.region_names[element.region],
        )
        .map_err(|e| write_error(elements_output, e))?;
    }
    elements_file
        .flush()
        .map_err(|e| write_error(elements_output, e))?;

    println!(
        "info: wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Computes the mean and peak temperature of every region
pub fn region_summary(mesh: &Mesh) -> Result<Vec<RegionSummary>, HeaterError> {
    let mut summaries: Vec<RegionSummary> = mesh
        .region_names
        .iter()
        .map(|name| RegionSummary {
            name: name.clone(),
            area: 0.0,
            mean_temperature: 0.0,
            max_temperature: f64::MIN,
        })
        .collect();

    for element in &mesh.elements {
        let area = element_area(element, &mesh.nodes).abs();
        let mut element_mean = 0.0;
        let summary = &mut summaries[element.region];

        for idx in element.nodes {
            let t = node_temperature(mesh, idx)?;
            element_mean += t / 3.0;
            summary.max_temperature = summary.max_temperature.max(t);
        }

        summary.area += area;
        summary.mean_temperature += element_mean * area;
    }

    for summary in summaries.iter_mut() {
        if summary.area > 0.0 {
            summary.mean_temperature /= summary.area;
        } else {
            summary.max_temperature = 0.0;
        }
    }

    Ok(summaries)
}

fn summary_json(summary: &RunSummary, mesh: &Mesh) -> JsonValue {
    let mut regions = JsonValue::new_object();
    for region in &summary.regions {
        let mut entry = JsonValue::new_object();
        entry["area"] = region.area.into();
        entry["mean_temperature"] = region.mean_temperature.into();
        entry["max_temperature"] = region.max_temperature.into();
        regions[region.name.as_str()] = entry;
    }

    let mut data = JsonValue::new_object();
    data["drive_current"] = summary.drive_current.into();
    data["current_density"] = summary.current_density.into();
    data["dissipated_power"] = summary.dissipated_power.into();
    data["nodes"] = mesh.nodes.len().into();
    data["elements"] = mesh.elements.len().into();
    data["cg_iterations"] = summary.iterations.into();
    data["max_temperature"] = summary.max_temperature.into();
    data["regions"] = regions;
    data
}

/// Writes the run summary as JSON
pub fn write_summary(path: &Path, summary: &RunSummary, mesh: &Mesh) -> Result<(), HeaterError> {
    let contents = json::stringify_pretty(summary_json(summary, mesh), 4);
    std::fs::write(path, contents).map_err(|e| write_error(path, e))?;

    println!("info: wrote summary to {}", path.display());
    Ok(())
}

/// Looks for scripts/plot.py next to the executable's ancestors, then in the
/// working directory
pub fn locate_plotter() -> PathBuf {
    let relative = Path::new("scripts").join("plot.py");

    if let Ok(exe) = std::env::current_exe() {
        if let Some(found) = exe
            .ancestors()
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
        {
            return found;
        }
    }

    relative
}

/// Plots the temperature field with the python plotter; blocks until the
/// plot window is closed
pub fn pyplot(
    nodes_csv: &Path,
    elements_csv: &Path,
    plotter_path: &Path,
) -> Result<(), HeaterError> {
    println!("info: plotting in python...");
    let status = match std::process::Command::new("python")
        .arg(plotter_path)
        .arg(nodes_csv)
        .arg(elements_csv)
        .status()
    {
        Ok(s) => s,
        Err(err) => {
            return Err(HeaterError::PostProcessor(format!(
                "Unable to start python: {err}"
            )))
        }
    };

    if !status.success() {
        return Err(HeaterError::PostProcessor(format!(
            "Plotter exited with {status}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::{parse_msh, tests::TWO_SQUARES_MSH};

    fn solved_two_squares() -> Mesh {
        let mut mesh = parse_msh(TWO_SQUARES_MSH).unwrap();
        // temperature equal to y
        for node in mesh.nodes.iter_mut() {
            node.temperature = Some(node.vertex.y);
        }
        mesh
    }

    #[test]
    fn summarises_regions() {
        let mesh = solved_two_squares();
        let summaries = region_summary(&mesh).unwrap();

        assert_eq!(summaries.len(), 2);
        for summary in &summaries {
            assert!((summary.area - 1.0).abs() < 1e-12);
            assert!((summary.mean_temperature - 0.5).abs() < 1e-12);
            assert_eq!(summary.max_temperature, 1.0);
        }
    }

    #[test]
    fn unsolved_mesh_is_an_error() {
        let mesh = parse_msh(TWO_SQUARES_MSH).unwrap();
        assert!(region_summary(&mesh).is_err());
    }

    #[test]
    fn writes_csv_files() {
        let mesh = solved_two_squares();
        let dir = std::env::temp_dir().join(format!("tops-thermal-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let nodes_csv = dir.join("nodes.csv");
        let elements_csv = dir.join("elements.csv");

        csv_output(&mesh, &[1.0, 1.0, 2.0, 2.0], &nodes_csv, &elements_csv).unwrap();

        let nodes = std::fs::read_to_string(&nodes_csv).unwrap();
        let elements = std::fs::read_to_string(&elements_csv).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(nodes.lines().count(), 7);
        assert_eq!(nodes.lines().nth(5), Some("1,1,1"));
        assert_eq!(elements.lines().next(), Some("n0,n1,n2,region,conductivity"));
        assert_eq!(elements.lines().nth(3), Some("1,2,5,right,2"));
    }

    #[test]
    fn summary_json_has_fields() {
        let mesh = solved_two_squares();
        let summary = RunSummary {
            drive_current: 1.5,
            current_density: 3.0,
            dissipated_power: 0.25,
            iterations: 7,
            max_temperature: 1.0,
            regions: region_summary(&mesh).unwrap(),
        };

        let data = summary_json(&summary, &mesh);
        assert_eq!(data["drive_current"].as_f64(), Some(1.5));
        assert_eq!(data["nodes"].as_usize(), Some(6));
        assert_eq!(data["cg_iterations"].as_u64(), Some(7));
        assert_eq!(data["regions"]["right"]["max_temperature"].as_f64(), Some(1.0));
    }
}
