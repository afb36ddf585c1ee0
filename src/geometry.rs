use crate::{
    datatypes::{Region, Vertex},
    error::HeaterError,
    params::HeaterGeometry,
};

/// Absolute tolerance on coordinates, in micrometers
pub const GEOMETRY_TOLERANCE: f64 = 1e-9;

/// Relative tolerance when comparing the tiled area with the window area
const AREA_TOLERANCE: f64 = 1e-9;

/// Ordered collection of non-overlapping material regions
#[derive(Debug, Clone)]
pub struct Geometry {
    pub regions: Vec<Region>,
}

/// Axis aligned bounding box of the simulation window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Window {
    pub fn area(&self) -> f64 {
        (self.x_max - self.x_min) * (self.y_max - self.y_min)
    }
}

fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Vertex> {
    vec![
        Vertex { x: x0, y: y0 },
        Vertex { x: x0, y: y1 },
        Vertex { x: x1, y: y1 },
        Vertex { x: x1, y: y0 },
    ]
}

/// Builds the cross-section of the heater
///
/// The cladding is notched around the waveguide and heater strip, so the
/// regions tile the window without overlapping.
///
/// # Arguments
/// * `dims` - The cross-section dimensions
///
/// # Returns
/// The regions in order core, slab_l, slab_r, heater_l, heater_r, clad, box
pub fn build_regions(dims: &HeaterGeometry) -> Geometry {
    let core_edge = dims.w_core / 2.0;
    let slab_edge = core_edge + dims.w_buffer;
    let heater_edge = slab_edge + dims.w_heater;
    let half_width = dims.w_sim / 2.0;
    let h_strip = dims.h_heater;

    let clad = vec![
        Vertex { x: -half_width, y: 0.0 },
        Vertex { x: -heater_edge, y: 0.0 },
        Vertex { x: -heater_edge, y: h_strip },
        Vertex { x: -core_edge, y: h_strip },
        Vertex { x: -core_edge, y: dims.h_core },
        Vertex { x: core_edge, y: dims.h_core },
        Vertex { x: core_edge, y: h_strip },
        Vertex { x: heater_edge, y: h_strip },
        Vertex { x: heater_edge, y: 0.0 },
        Vertex { x: half_width, y: 0.0 },
        Vertex { x: half_width, y: dims.h_clad },
        Vertex { x: -half_width, y: dims.h_clad },
    ];

    let regions = vec![
        ("core", rectangle(-core_edge, 0.0, core_edge, dims.h_core)),
        ("slab_l", rectangle(-slab_edge, 0.0, -core_edge, h_strip)),
        ("slab_r", rectangle(slab_edge, 0.0, core_edge, h_strip)),
        ("heater_l", rectangle(-heater_edge, 0.0, -slab_edge, h_strip)),
        ("heater_r", rectangle(heater_edge, 0.0, slab_edge, h_strip)),
        ("clad", clad),
        ("box", rectangle(-half_width, 0.0, half_width, -dims.h_box)),
    ];

    Geometry {
        regions: regions
            .into_iter()
            .map(|(name, polygon)| Region {
                name: name.to_owned(),
                polygon,
            })
            .collect(),
    }
}

/// Computes the area of a polygon with the shoelace formula
pub fn polygon_area(polygon: &[Vertex]) -> f64 {
    let mut twice_area = 0.0;
    for (i, v0) in polygon.iter().enumerate() {
        let v1 = &polygon[(i + 1) % polygon.len()];
        twice_area += v0.x * v1.y - v1.x * v0.y;
    }
    0.5 * twice_area.abs()
}

pub fn same_point(a: &Vertex, b: &Vertex) -> bool {
    (a.x - b.x).abs() <= GEOMETRY_TOLERANCE && (a.y - b.y).abs() <= GEOMETRY_TOLERANCE
}

/// Twice the signed area of the triangle (a, b, c)
fn orientation(a: &Vertex, b: &Vertex, c: &Vertex) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn sign(value: f64) -> i8 {
    if value > GEOMETRY_TOLERANCE {
        1
    } else if value < -GEOMETRY_TOLERANCE {
        -1
    } else {
        0
    }
}

/// Returns the parameter of `p` along segment (a, b) when `p` lies on it
pub fn point_on_segment(p: &Vertex, a: &Vertex, b: &Vertex) -> Option<f64> {
    let length_sq = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
    if length_sq == 0.0 {
        return None;
    }
    // orientation scales with segment length
    if orientation(a, b, p).abs() > GEOMETRY_TOLERANCE * length_sq.sqrt() {
        return None;
    }
    let t = ((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / length_sq;
    let slack = GEOMETRY_TOLERANCE / length_sq.sqrt();
    if t < -slack || t > 1.0 + slack {
        return None;
    }
    Some(t)
}

/// Checks whether two segments share any point, touching included
fn segments_touch(a0: &Vertex, a1: &Vertex, b0: &Vertex, b1: &Vertex) -> bool {
    if segments_cross(a0, a1, b0, b1) {
        return true;
    }
    point_on_segment(b0, a0, a1).is_some()
        || point_on_segment(b1, a0, a1).is_some()
        || point_on_segment(a0, b0, b1).is_some()
        || point_on_segment(a1, b0, b1).is_some()
}

/// Checks whether two segments cross at a single interior point
fn segments_cross(a0: &Vertex, a1: &Vertex, b0: &Vertex, b1: &Vertex) -> bool {
    let d0 = sign(orientation(a0, a1, b0));
    let d1 = sign(orientation(a0, a1, b1));
    let d2 = sign(orientation(b0, b1, a0));
    let d3 = sign(orientation(b0, b1, a1));

    d0 * d1 < 0 && d2 * d3 < 0
}

/// Checks whether `p` lies strictly inside the polygon; boundary points
/// are outside
pub fn contains_strict(polygon: &[Vertex], p: &Vertex) -> bool {
    let n = polygon.len();
    for i in 0..n {
        if point_on_segment(p, &polygon[i], &polygon[(i + 1) % n]).is_some() {
            return false;
        }
    }

    let mut inside = false;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Validates a single polygon: at least 3 distinct vertices, no repeated
/// consecutive vertices and no self-intersection
pub fn validate_polygon(name: &str, polygon: &[Vertex]) -> Result<(), HeaterError> {
    let mut distinct: Vec<&Vertex> = Vec::new();
    for v in polygon {
        if !distinct.iter().any(|d| same_point(d, v)) {
            distinct.push(v);
        }
    }
    if distinct.len() < 3 {
        return Err(HeaterError::Geometry(format!(
            "Region '{name}' has {} distinct vertices, needs at least 3",
            distinct.len()
        )));
    }
    if distinct.len() != polygon.len() {
        return Err(HeaterError::Geometry(format!(
            "Region '{name}' repeats a vertex"
        )));
    }

    let n = polygon.len();
    for i in 0..n {
        let a0 = &polygon[i];
        let a1 = &polygon[(i + 1) % n];
        for j in (i + 1)..n {
            let b0 = &polygon[j];
            let b1 = &polygon[(j + 1) % n];
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);

            if adjacent {
                // adjacent edges may only meet at their shared vertex
                let (shared, far_a, far_b) = if j == i + 1 {
                    (a1, a0, b1)
                } else {
                    (a0, a1, b0)
                };
                let folded = sign(orientation(far_a, shared, far_b)) == 0
                    && (far_a.x - shared.x) * (far_b.x - shared.x)
                        + (far_a.y - shared.y) * (far_b.y - shared.y)
                        > 0.0;
                if folded {
                    return Err(HeaterError::Geometry(format!(
                        "Region '{name}' folds back on itself at ({}, {})",
                        shared.x, shared.y
                    )));
                }
            } else if segments_touch(a0, a1, b0, b1) {
                return Err(HeaterError::Geometry(format!(
                    "Region '{name}' self-intersects between edges {i} and {j}"
                )));
            }
        }
    }

    Ok(())
}

impl Geometry {
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Sums the areas of the named regions
    pub fn area_of(&self, names: &[String]) -> Result<f64, HeaterError> {
        let mut area = 0.0;
        for name in names {
            let region = self.region(name).ok_or_else(|| {
                HeaterError::Input(format!("No region named '{name}' in geometry"))
            })?;
            area += polygon_area(&region.polygon);
        }
        Ok(area)
    }

    pub fn window(&self) -> Window {
        let mut window = Window {
            x_min: f64::MAX,
            x_max: f64::MIN,
            y_min: f64::MAX,
            y_max: f64::MIN,
        };
        for v in self.regions.iter().flat_map(|r| r.polygon.iter()) {
            window.x_min = window.x_min.min(v.x);
            window.x_max = window.x_max.max(v.x);
            window.y_min = window.y_min.min(v.y);
            window.y_max = window.y_max.max(v.y);
        }
        window
    }

    /// Checks that the regions are valid polygons that tile the window
    /// without gaps or overlaps
    pub fn validate(&self) -> Result<(), HeaterError> {
        if self.regions.is_empty() {
            return Err(HeaterError::Geometry("No regions defined".to_owned()));
        }

        for (i, region) in self.regions.iter().enumerate() {
            if self.regions[..i].iter().any(|r| r.name == region.name) {
                return Err(HeaterError::Geometry(format!(
                    "Duplicate region name '{}'",
                    region.name
                )));
            }
            validate_polygon(&region.name, &region.polygon)?;
        }

        for (i, a) in self.regions.iter().enumerate() {
            for b in self.regions[i + 1..].iter() {
                check_disjoint(a, b)?;
            }
        }

        let window_area = self.window().area();
        let tiled_area: f64 = self.regions.iter().map(|r| polygon_area(&r.polygon)).sum();
        if (tiled_area - window_area).abs() > AREA_TOLERANCE * window_area {
            return Err(HeaterError::Geometry(format!(
                "Regions cover {tiled_area} but the window has area {window_area}"
            )));
        }

        Ok(())
    }
}

/// Offset of the sample points taken on either side of an edge piece
const SIDE_OFFSET: f64 = 1e-6;

fn check_disjoint(a: &Region, b: &Region) -> Result<(), HeaterError> {
    let overlap = || {
        Err(HeaterError::Geometry(format!(
            "Regions '{}' and '{}' overlap",
            a.name, b.name
        )))
    };

    let na = a.polygon.len();
    let nb = b.polygon.len();
    for i in 0..na {
        for j in 0..nb {
            if segments_cross(
                &a.polygon[i],
                &a.polygon[(i + 1) % na],
                &b.polygon[j],
                &b.polygon[(j + 1) % nb],
            ) {
                return overlap();
            }
        }
    }

    // without proper crossings, any shared area is bounded by an edge piece
    // of one polygon with shared interior on one of its sides
    if edges_enter(&a.polygon, &b.polygon) || edges_enter(&b.polygon, &a.polygon) {
        return overlap();
    }

    Ok(())
}

/// Splits every edge of `outer` at the vertices of `other` lying on it and
/// checks whether a point just beside any piece is strictly inside both
/// polygons
fn edges_enter(outer: &[Vertex], other: &[Vertex]) -> bool {
    let n = outer.len();
    for i in 0..n {
        let a = &outer[i];
        let b = &outer[(i + 1) % n];

        let mut cuts: Vec<f64> = vec![0.0, 1.0];
        cuts.extend(other.iter().filter_map(|v| point_on_segment(v, a, b)));
        cuts.sort_by(|x, y| x.total_cmp(y));

        let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        let (nx, ny) = ((a.y - b.y) / length, (b.x - a.x) / length);

        for piece in cuts.windows(2) {
            let piece_length = (piece[1] - piece[0]) * length;
            if piece_length <= GEOMETRY_TOLERANCE {
                continue;
            }
            let t = 0.5 * (piece[0] + piece[1]);
            let mid = Vertex {
                x: a.x + t * (b.x - a.x),
                y: a.y + t * (b.y - a.y),
            };
            let offset = SIDE_OFFSET.min(1e-3 * piece_length);

            for side in [-1.0, 1.0] {
                let probe = Vertex {
                    x: mid.x + side * offset * nx,
                    y: mid.y + side * offset * ny,
                };
                if contains_strict(outer, &probe) && contains_strict(other, &probe) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_tiles_window() {
        let geometry = build_regions(&HeaterGeometry::default());
        geometry.validate().unwrap();

        let window = geometry.window();
        assert_eq!(
            window,
            Window {
                x_min: -8.0,
                x_max: 8.0,
                y_min: -2.0,
                y_max: 2.8
            }
        );

        let total: f64 = geometry
            .regions
            .iter()
            .map(|r| polygon_area(&r.polygon))
            .sum();
        assert!((total - 16.0 * 4.8).abs() < 1e-9);
    }

    #[test]
    fn region_order_is_stable() {
        let geometry = build_regions(&HeaterGeometry::default());
        let names: Vec<&str> = geometry.regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["core", "slab_l", "slab_r", "heater_l", "heater_r", "clad", "box"]
        );
    }

    #[test]
    fn every_region_is_a_simple_polygon() {
        let geometry = build_regions(&HeaterGeometry::default());
        for region in &geometry.regions {
            assert!(region.polygon.len() >= 3);
            validate_polygon(&region.name, &region.polygon).unwrap();
        }
    }

    #[test]
    fn heater_area() {
        let geometry = build_regions(&HeaterGeometry::default());
        let area = geometry
            .area_of(&["heater_l".to_owned(), "heater_r".to_owned()])
            .unwrap();
        assert!((area - 0.18).abs() < 1e-12);
        assert!(geometry.area_of(&["missing".to_owned()]).is_err());
    }

    #[test]
    fn bowtie_is_rejected() {
        let bowtie = vec![
            Vertex { x: 0.0, y: 0.0 },
            Vertex { x: 1.0, y: 1.0 },
            Vertex { x: 1.0, y: 0.0 },
            Vertex { x: 0.0, y: 1.0 },
        ];
        assert!(validate_polygon("bowtie", &bowtie).is_err());
    }

    #[test]
    fn degenerate_polygon_is_rejected() {
        let line = vec![
            Vertex { x: 0.0, y: 0.0 },
            Vertex { x: 1.0, y: 0.0 },
            Vertex { x: 0.0, y: 0.0 },
        ];
        assert!(validate_polygon("line", &line).is_err());
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let mut geometry = build_regions(&HeaterGeometry::default());
        // full cladding rectangle overlaps the strip and core
        let clad = geometry
            .regions
            .iter_mut()
            .find(|r| r.name == "clad")
            .unwrap();
        clad.polygon = rectangle(-8.0, 0.0, 8.0, 2.8);

        assert!(geometry.validate().is_err());
    }

    #[test]
    fn shifted_heater_overlapping_slab_is_rejected() {
        let mut geometry = build_regions(&HeaterGeometry::default());
        // overlaps slab_l by 0.1 and opens an equal gap at the cladding notch
        let heater = geometry
            .regions
            .iter_mut()
            .find(|r| r.name == "heater_l")
            .unwrap();
        for v in heater.polygon.iter_mut() {
            v.x += 0.1;
        }

        match geometry.validate() {
            Err(HeaterError::Geometry(msg)) => {
                assert!(msg.contains("overlap"), "{msg}");
                assert!(msg.contains("heater_l"), "{msg}");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn identical_regions_are_rejected() {
        let square = rectangle(0.0, 0.0, 1.0, 1.0);
        let a = Region {
            name: "a".to_owned(),
            polygon: square.clone(),
        };
        let b = Region {
            name: "b".to_owned(),
            polygon: square,
        };
        assert!(check_disjoint(&a, &b).is_err());
    }

    #[test]
    fn neighbours_sharing_part_of_an_edge_are_disjoint() {
        let a = Region {
            name: "a".to_owned(),
            polygon: rectangle(0.0, 0.0, 1.0, 1.0),
        };
        let b = Region {
            name: "b".to_owned(),
            polygon: rectangle(1.0, 0.5, 2.0, 3.0),
        };
        check_disjoint(&a, &b).unwrap();
    }

    #[test]
    fn gap_is_rejected() {
        let mut geometry = build_regions(&HeaterGeometry::default());
        geometry.regions.retain(|r| r.name != "slab_l");

        match geometry.validate() {
            Err(HeaterError::Geometry(msg)) => assert!(msg.contains("cover")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn strict_containment_ignores_boundary() {
        let square = rectangle(0.0, 0.0, 1.0, 1.0);
        assert!(contains_strict(&square, &Vertex { x: 0.5, y: 0.5 }));
        assert!(!contains_strict(&square, &Vertex { x: 0.0, y: 0.5 }));
        assert!(!contains_strict(&square, &Vertex { x: 1.5, y: 0.5 }));
    }
}
