//! Joule heating of the resistive strips.
//!
//! The drive current follows from the planar resistance
//! `R = resistivity * length / area` and `P = I^2 R`.

use crate::{datatypes::Mesh, error::HeaterError, fields::element_area};

/// Converts an area in um^2 to m^2
pub const UM2_TO_M2: f64 = 1e-12;

/// Computes the drive current that dissipates `power` in the heaters
///
/// # Arguments
/// * `power` - The target dissipated power
/// * `specific_conductivity` - Electrical conductivity of the heater material
/// * `heater_area` - Combined cross-section of the heaters, in um^2
/// * `resistivity` - Resistivity of the heater material
pub fn drive_current(
    power: f64,
    specific_conductivity: f64,
    heater_area: f64,
    resistivity: f64,
) -> Result<f64, HeaterError> {
    if heater_area <= 0.0 || resistivity <= 0.0 {
        return Err(HeaterError::Input(
            "Heater area and resistivity must be positive".to_owned(),
        ));
    }
    if power < 0.0 {
        return Err(HeaterError::Input("Power must not be negative".to_owned()));
    }

    Ok(f64::sqrt(
        power * specific_conductivity * heater_area * UM2_TO_M2 / resistivity,
    ))
}

/// Uniform current density when `current` flows through `heater_area`
pub fn current_density(current: f64, heater_area: f64) -> f64 {
    current / heater_area
}

/// Electrical parameters of the regions carrying current
#[derive(Debug, Clone, Default)]
pub struct HeatSources {
    pub specific_conductivity: Vec<(String, f64)>,
    pub current_density: Vec<(String, f64)>,
}

impl HeatSources {
    /// Drives every named region with the same current density
    pub fn uniform(regions: &[String], specific_conductivity: f64, density: f64) -> HeatSources {
        HeatSources {
            specific_conductivity: regions
                .iter()
                .map(|name| (name.clone(), specific_conductivity))
                .collect(),
            current_density: regions.iter().map(|name| (name.clone(), density)).collect(),
        }
    }

    pub fn current_density_of(&self, region: &str) -> Option<f64> {
        self.current_density
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, j)| *j)
    }

    /// Volumetric heat generation `J^2 / sigma` in a region
    pub fn volumetric(&self, region: &str) -> Result<f64, HeaterError> {
        let density = match self.current_density_of(region) {
            Some(j) => j,
            None => return Ok(0.0),
        };

        let sigma = self
            .specific_conductivity
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, s)| *s)
            .ok_or_else(|| {
                HeaterError::Input(format!(
                    "Source region '{region}' has no specific conductivity"
                ))
            })?;
        if sigma <= 0.0 {
            return Err(HeaterError::Input(format!(
                "Specific conductivity of '{region}' must be positive"
            )));
        }

        Ok(density * density / sigma)
    }

    /// Heat generation of every mesh region, indexed like `Mesh::region_names`
    pub fn per_region(&self, mesh: &Mesh) -> Result<Vec<f64>, HeaterError> {
        for (name, _) in &self.current_density {
            if mesh.region_index(name).is_none() {
                return Err(HeaterError::Input(format!(
                    "Source region '{name}' is not part of the mesh"
                )));
            }
        }

        mesh.region_names
            .iter()
            .map(|name| self.volumetric(name))
            .collect()
    }
}

/// Integrates the heat generation over the mesh
pub fn dissipated_power(mesh: &Mesh, sources: &HeatSources) -> Result<f64, HeaterError> {
    let per_region = sources.per_region(mesh)?;

    Ok(mesh
        .elements
        .iter()
        .map(|element| per_region[element.region] * element_area(element, &mesh.nodes).abs())
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::build_regions,
        mesher::{parse_msh, tests::TWO_SQUARES_MSH},
        params::{DriveSettings, HeaterGeometry},
    };

    #[test]
    fn drive_current_matches_planar_relation() {
        let drive = DriveSettings::default();
        let geometry = build_regions(&HeaterGeometry::default());
        let area = geometry.area_of(&drive.heater_regions).unwrap();

        let current = drive_current(
            drive.power,
            drive.specific_conductivity,
            area,
            drive.resistivity,
        )
        .unwrap();

        let expected = f64::sqrt(25.2e-3 * 1e5 * 0.18 * 1e-12 / 320e-6);
        assert!((current - expected).abs() <= 1e-12 * expected);
        assert!((current - 1.190588089e-3).abs() < 1e-12);
    }

    #[test]
    fn heaters_share_current_density() {
        let drive = DriveSettings::default();
        let current = drive_current(drive.power, drive.specific_conductivity, 0.18, drive.resistivity)
            .unwrap();
        let density = current_density(current, 0.18);
        assert_eq!(density, current / 0.18);

        let sources = HeatSources::uniform(&drive.heater_regions, drive.specific_conductivity, density);
        assert_eq!(
            sources.current_density_of("heater_l"),
            sources.current_density_of("heater_r")
        );
        assert_eq!(
            sources.volumetric("heater_l").unwrap(),
            sources.volumetric("heater_r").unwrap()
        );
        assert_eq!(sources.volumetric("core").unwrap(), 0.0);
    }

    #[test]
    fn rejects_bad_drive() {
        assert!(drive_current(1.0, 1e5, 0.0, 320e-6).is_err());
        assert!(drive_current(-1.0, 1e5, 0.18, 320e-6).is_err());
    }

    #[test]
    fn source_without_conductivity_is_an_error() {
        let sources = HeatSources {
            specific_conductivity: vec![],
            current_density: vec![("left".to_owned(), 2.0)],
        };
        assert!(sources.volumetric("left").is_err());
    }

    #[test]
    fn dissipated_power_integrates_source() {
        let mesh = parse_msh(TWO_SQUARES_MSH).unwrap();
        let sources = HeatSources::uniform(&["right".to_owned()], 4.0, 2.0);

        // q = 2^2 / 4 = 1 over a unit square
        let power = dissipated_power(&mesh, &sources).unwrap();
        assert!((power - 1.0).abs() < 1e-12);

        let unknown = HeatSources::uniform(&["heater".to_owned()], 4.0, 2.0);
        assert!(dissipated_power(&mesh, &unknown).is_err());
    }
}
