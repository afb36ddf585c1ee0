use crate::{
    datatypes::{Element, Mesh, Node},
    error::HeaterError,
    params::{MaterialTable, PER_M2_TO_PER_UM2},
};

/// Calculates the signed area of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
///
/// # Returns
/// The area of the element, positive for counter-clockwise node order
pub fn element_area(element: &Element, nodes: &[Node]) -> f64 {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Builds the piecewise-constant thermal conductivity of the mesh
///
/// Values come from the material table, converted from 1/m^2 to the
/// mesh's 1/um^2 units.
///
/// # Arguments
/// * `mesh` - The loaded mesh
/// * `materials` - Thermal conductivity per region
///
/// # Returns
/// One conductivity per element, in element order
pub fn conductivity_p0(mesh: &Mesh, materials: &MaterialTable) -> Result<Vec<f64>, HeaterError> {
    let mut per_region: Vec<f64> = Vec::with_capacity(mesh.region_names.len());
    for name in &mesh.region_names {
        match materials.conductivity_of(name) {
            Some(k) => per_region.push(k * PER_M2_TO_PER_UM2),
            None => {
                return Err(HeaterError::Input(format!(
                    "No thermal conductivity for region '{name}'"
                )))
            }
        }
    }

    Ok(mesh
        .elements
        .iter()
        .map(|element| per_region[element.region])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::{parse_msh, tests::TWO_SQUARES_MSH};

    fn two_squares() -> Mesh {
        parse_msh(TWO_SQUARES_MSH).unwrap()
    }

    fn two_square_materials() -> MaterialTable {
        MaterialTable {
            thermal_conductivity: vec![("left".to_owned(), 1.38), ("right".to_owned(), 90.0)],
        }
    }

    #[test]
    fn conductivity_follows_regions() {
        let mesh = two_squares();
        let conductivity = conductivity_p0(&mesh, &two_square_materials()).unwrap();

        assert_eq!(conductivity.len(), mesh.elements.len());
        assert_eq!(conductivity[0], 1.38 * 1e-12);
        assert_eq!(conductivity[1], 1.38 * 1e-12);
        assert_eq!(conductivity[2], 90.0 * 1e-12);
        assert_eq!(conductivity[3], 90.0 * 1e-12);
    }

    #[test]
    fn conductivity_is_deterministic() {
        let materials = two_square_materials();
        let first = conductivity_p0(&two_squares(), &materials).unwrap();
        let second = conductivity_p0(&two_squares(), &materials).unwrap();

        let first_bits: Vec<u64> = first.iter().map(|k| k.to_bits()).collect();
        let second_bits: Vec<u64> = second.iter().map(|k| k.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn missing_material_is_an_error() {
        let materials = MaterialTable {
            thermal_conductivity: vec![("left".to_owned(), 1.38)],
        };
        assert!(matches!(
            conductivity_p0(&two_squares(), &materials),
            Err(HeaterError::Input(_))
        ));
    }

    #[test]
    fn element_area_is_signed() {
        let mesh = two_squares();
        let area = element_area(&mesh.elements[0], &mesh.nodes);
        assert!((area - 0.5).abs() < 1e-15);

        let flipped = Element {
            nodes: [0, 4, 1],
            region: 0,
        };
        assert!((element_area(&flipped, &mesh.nodes) + 0.5).abs() < 1e-15);
    }
}
