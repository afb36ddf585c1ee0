//! Fixed parameters of the simulated heater (TiN TOPS heater from
//! https://doi.org/10.1364/OE.27.010456). All lengths are in micrometers.

use crate::datatypes::MeshDirective;

/// Converts a conductivity expressed per m^2 into the mesh's um^2 units
pub const PER_M2_TO_PER_UM2: f64 = 1e-12;

/// Global maximum element edge length used outside refined regions
pub const DEFAULT_RESOLUTION_MAX: f64 = 0.1;

/// Cross-section dimensions
#[derive(Debug, Clone, Copy)]
pub struct HeaterGeometry {
    pub w_sim: f64,
    pub h_clad: f64,
    pub h_box: f64,
    pub w_core: f64,
    pub h_core: f64,
    pub w_buffer: f64,
    pub h_heater: f64,
    pub w_heater: f64,
}

impl Default for HeaterGeometry {
    fn default() -> Self {
        HeaterGeometry {
            w_sim: 8.0 * 2.0,
            h_clad: 2.8,
            h_box: 2.0,
            w_core: 0.5,
            h_core: 0.22,
            w_buffer: 0.8,
            h_heater: 0.09,
            w_heater: 1.0,
        }
    }
}

/// Thermal conductivity per region, in W/(m K)
#[derive(Debug, Clone)]
pub struct MaterialTable {
    pub thermal_conductivity: Vec<(String, f64)>,
}

impl MaterialTable {
    pub fn conductivity_of(&self, region: &str) -> Option<f64> {
        self.thermal_conductivity
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, k)| *k)
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        let entries = [
            ("core", 90.0),
            ("box", 1.38),
            ("clad", 1.38),
            ("slab_l", 55.0),
            ("slab_r", 55.0),
            ("heater_l", 55.0),
            ("heater_r", 55.0),
        ];

        MaterialTable {
            thermal_conductivity: entries
                .iter()
                .map(|(name, k)| (name.to_string(), *k))
                .collect(),
        }
    }
}

/// Electrical drive of the heater strips
#[derive(Debug, Clone)]
pub struct DriveSettings {
    /// Target total dissipated power
    pub power: f64,
    /// Electrical (specific) conductivity of the heater material
    pub specific_conductivity: f64,
    pub resistivity: f64,
    pub heater_regions: Vec<String>,
}

impl Default for DriveSettings {
    fn default() -> Self {
        DriveSettings {
            power: 25.2e-3,
            specific_conductivity: 1e5,
            resistivity: 320e-6,
            heater_regions: vec!["heater_l".to_owned(), "heater_r".to_owned()],
        }
    }
}

/// Per-region mesh resolution, fine at the core and heaters where the
/// gradients are steep
pub fn default_resolutions() -> Vec<(String, MeshDirective)> {
    let entries = [
        ("core", 0.001, 1.0),
        // coarser than DEFAULT_RESOLUTION_MAX, so the global maximum governs
        ("clad", 0.4, 1.0),
        ("box", 0.4, 1.0),
        ("heater_l", 0.001, 1.0),
        ("heater_r", 0.001, 1.0),
    ];

    entries
        .iter()
        .map(|(name, resolution, distance)| {
            (
                name.to_string(),
                MeshDirective {
                    resolution: *resolution,
                    distance: *distance,
                },
            )
        })
        .collect()
}
