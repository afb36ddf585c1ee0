use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    datatypes::{Element, Mesh, MeshDirective, Node, Vertex},
    error::HeaterError,
    geometry::{point_on_segment, same_point, Geometry, GEOMETRY_TOLERANCE},
};

/// Gmsh element type of a 3-node triangle
const GMSH_TRIANGLE: usize = 2;

enum MeshSection {
    Format,
    PhysicalNames,
    Entities,
    Nodes,
    Elements,
    Other,
}

impl MeshSection {
    fn from_header(line: &str) -> Option<MeshSection> {
        if !line.starts_with('$') || line.starts_with("$End") {
            return None;
        }
        Some(match line {
            "$MeshFormat" => MeshSection::Format,
            "$PhysicalNames" => MeshSection::PhysicalNames,
            "$Entities" => MeshSection::Entities,
            "$Nodes" => MeshSection::Nodes,
            "$Elements" => MeshSection::Elements,
            _ => MeshSection::Other,
        })
    }
}

/// Regions as a planar straight-line graph: merged points, undirected lines
/// and one signed curve loop per region
#[derive(Debug)]
struct PlanarGraph {
    points: Vec<Vertex>,
    lines: Vec<(usize, usize)>,
    loops: Vec<Vec<i64>>,
}

fn find_or_insert_point(points: &mut Vec<Vertex>, vertex: &Vertex) -> usize {
    match points.iter().position(|p| same_point(p, vertex)) {
        Some(idx) => idx,
        None => {
            points.push(*vertex);
            points.len() - 1
        }
    }
}

/// Merges the region polygons into a conformal planar graph
///
/// Every polygon edge is split at the vertices of other regions lying on
/// it, so that boundaries shared by neighbouring regions become the same
/// curves. Line ids in the loops are 1-based; a negative id walks the line
/// backwards.
fn build_planar_graph(geometry: &Geometry) -> PlanarGraph {
    let mut points: Vec<Vertex> = Vec::new();
    let polygon_indices: Vec<Vec<usize>> = geometry
        .regions
        .iter()
        .map(|region| {
            region
                .polygon
                .iter()
                .map(|v| find_or_insert_point(&mut points, v))
                .collect()
        })
        .collect();

    let mut lines: Vec<(usize, usize)> = Vec::new();
    let mut loops: Vec<Vec<i64>> = Vec::with_capacity(polygon_indices.len());

    for indices in &polygon_indices {
        let mut curve_loop: Vec<i64> = Vec::new();

        for (i, &start) in indices.iter().enumerate() {
            let end = indices[(i + 1) % indices.len()];

            // points strictly between the edge's ends
            let mut splits: Vec<(f64, usize)> = points
                .iter()
                .enumerate()
                .filter(|(k, _)| *k != start && *k != end)
                .filter_map(|(k, p)| {
                    point_on_segment(p, &points[start], &points[end]).map(|t| (t, k))
                })
                .filter(|(t, _)| *t > GEOMETRY_TOLERANCE && *t < 1.0 - GEOMETRY_TOLERANCE)
                .collect();
            splits.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut chain = vec![start];
            chain.extend(splits.iter().map(|(_, k)| *k));
            chain.push(end);

            for pair in chain.windows(2) {
                let (from, to) = (pair[0], pair[1]);
                let signed_id = if let Some(id) = lines.iter().position(|l| *l == (from, to)) {
                    id as i64 + 1
                } else if let Some(id) = lines.iter().position(|l| *l == (to, from)) {
                    -(id as i64 + 1)
                } else {
                    lines.push((from, to));
                    lines.len() as i64
                };
                curve_loop.push(signed_id);
            }
        }

        loops.push(curve_loop);
    }

    PlanarGraph {
        points,
        lines,
        loops,
    }
}

/// Builds the contents of a .geo file for the geometry
///
/// # Arguments
/// * `geometry` - The validated region geometry
/// * `directives` - Per-region mesh resolutions
/// * `default_resolution_max` - The global maximum element size
///
/// # Returns
/// The .geo script as a String
pub fn build_geo(
    geometry: &Geometry,
    directives: &[(String, MeshDirective)],
    default_resolution_max: f64,
) -> Result<String, HeaterError> {
    for (name, directive) in directives {
        if geometry.region(name).is_none() {
            return Err(HeaterError::Input(format!(
                "Mesh directive for unknown region '{name}'"
            )));
        }
        if directive.resolution <= 0.0 || directive.distance < 0.0 {
            return Err(HeaterError::Input(format!(
                "Mesh directive for '{name}' needs a positive resolution and distance"
            )));
        }
    }
    if default_resolution_max <= 0.0 {
        return Err(HeaterError::Input(
            "Default maximum resolution must be positive".to_owned(),
        ));
    }

    let graph = build_planar_graph(geometry);
    let mut geo = String::new();

    geo.push_str("// Define points\n");
    for (i, vertex) in graph.points.iter().enumerate() {
        geo.push_str(&format!(
            "Point({}) = {{ {}, {}, 0, {} }};\n",
            i + 1,
            vertex.x,
            vertex.y,
            default_resolution_max
        ));
    }

    geo.push_str("\n// Connect points\n");
    for (i, (from, to)) in graph.lines.iter().enumerate() {
        geo.push_str(&format!(
            "Line({}) = {{ {}, {} }};\n",
            i + 1,
            from + 1,
            to + 1
        ));
    }

    geo.push_str("\n// Register loops and surfaces\n");
    for (i, (region, curve_loop)) in std::iter::zip(&geometry.regions, &graph.loops).enumerate() {
        let ids: Vec<String> = curve_loop.iter().map(|id| id.to_string()).collect();
        geo.push_str(&format!(
            "Curve Loop({tag}) = {{ {ids} }};\n\
            Plane Surface({tag}) = {{ {tag} }};\n\
            Physical Surface(\"{name}\", {tag}) = {{ {tag} }};\n",
            tag = i + 1,
            ids = ids.join(", "),
            name = region.name,
        ));
    }

    geo.push_str("\n// Define size fields\n");
    let mut field_id = 0;
    let mut size_fields: Vec<String> = Vec::new();
    for (name, directive) in directives {
        let surface = geometry
            .regions
            .iter()
            .position(|r| &r.name == name)
            .ok_or_else(|| HeaterError::Input(format!("No region named '{name}'")))?;

        let mut curves: Vec<usize> = graph.loops[surface]
            .iter()
            .map(|id| id.unsigned_abs() as usize)
            .collect();
        curves.sort();
        curves.dedup();
        let curves: Vec<String> = curves.iter().map(|c| c.to_string()).collect();

        let distance_field = field_id + 1;
        let threshold_field = field_id + 2;
        let constant_field = field_id + 3;
        field_id += 3;

        geo.push_str(&format!(
            "// {name}\n\
            Field[{distance_field}] = Distance;\n\
            Field[{distance_field}].CurvesList = {{ {curves} }};\n\
            Field[{distance_field}].Sampling = 100;\n\
            Field[{threshold_field}] = Threshold;\n\
            Field[{threshold_field}].InField = {distance_field};\n\
            Field[{threshold_field}].SizeMin = {res};\n\
            Field[{threshold_field}].SizeMax = {res_max};\n\
            Field[{threshold_field}].DistMin = 0;\n\
            Field[{threshold_field}].DistMax = {dist};\n\
            Field[{constant_field}] = Constant;\n\
            Field[{constant_field}].VIn = {res};\n\
            Field[{constant_field}].VOut = {res_max};\n\
            Field[{constant_field}].SurfacesList = {{ {surface_tag} }};\n",
            curves = curves.join(", "),
            res = directive.resolution,
            res_max = default_resolution_max,
            dist = directive.distance,
            surface_tag = surface + 1,
        ));

        size_fields.push(threshold_field.to_string());
        size_fields.push(constant_field.to_string());
    }

    if !size_fields.is_empty() {
        let min_field = field_id + 1;
        geo.push_str(&format!(
            "Field[{min_field}] = Min;\n\
            Field[{min_field}].FieldsList = {{ {fields} }};\n\
            Background Field = {min_field};\n",
            fields = size_fields.join(", "),
        ));
    }

    geo.push_str(&format!(
        "\n// Define Mesh Settings\n\
        Mesh.ElementOrder = 1;\n\
        Mesh.CharacteristicLengthMax = {cl_max};\n\
        Mesh.CharacteristicLengthExtendFromBoundary = 0;\n\
        Mesh.CharacteristicLengthFromPoints = 0;\n\
        Mesh.CharacteristicLengthFromCurvature = 0;\n\
        Mesh.MshFileVersion = 4.1;\n",
        cl_max = default_resolution_max,
    ));

    Ok(geo)
}

/// Runs Gmsh to create a mesh from the geometry
///
/// # Arguments
/// * `geometry` - The validated region geometry
/// * `directives` - Per-region mesh resolutions
/// * `default_resolution_max` - The global maximum element size
/// * `gmsh` - The gmsh executable
/// * `output` - The output filepath of the .msh file
fn compute_mesh(
    geometry: &Geometry,
    directives: &[(String, MeshDirective)],
    default_resolution_max: f64,
    gmsh: &str,
    output: &Path,
) -> Result<(), HeaterError> {
    let geo_filepath = output.with_extension("geo");

    println!(
        "info: building .geo for Gmsh with {} regions and CL max {:.3}",
        geometry.regions.len(),
        default_resolution_max
    );
    let geo = build_geo(geometry, directives, default_resolution_max)?;
    std::fs::write(&geo_filepath, geo)
        .map_err(|err| HeaterError::Mesher(format!("Failed to write .geo file: {err}")))?;

    println!("info: running gmsh...");
    let result = std::process::Command::new(gmsh)
        .arg(&geo_filepath)
        .arg("-2")
        .arg("-format")
        .arg("msh41")
        .arg("-o")
        .arg(output)
        .output();

    if let Err(err) = std::fs::remove_file(&geo_filepath) {
        println!("warning [mesh]: failed to delete .geo file: {err}");
    }

    let result = match result {
        Ok(out) => out,
        Err(err) => {
            return Err(HeaterError::Mesher(format!(
                "Unable to start gmsh ({gmsh}): {err}"
            )));
        }
    };

    if !result.status.success() {
        return Err(HeaterError::Mesher(format!(
            "Gmsh failed with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr)
        )));
    }

    Ok(())
}

fn next_line<'a, I>(lines: &mut I, section: &str) -> Result<&'a str, HeaterError>
where
    I: Iterator<Item = &'a str>,
{
    lines
        .next()
        .ok_or_else(|| HeaterError::Mesher(format!("Unexpected end of mesh in {section}")))
}

fn parse_fields<T: FromStr>(line: &str, section: &str) -> Result<Vec<T>, HeaterError> {
    line.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| {
                HeaterError::Mesher(format!("Unexpected value '{token}' in {section}"))
            })
        })
        .collect()
}

fn expect_len<T>(fields: &[T], len: usize, section: &str) -> Result<(), HeaterError> {
    if fields.len() < len {
        return Err(HeaterError::Mesher(format!(
            "Truncated line in {section}: expected {len} fields, found {}",
            fields.len()
        )));
    }
    Ok(())
}

/// Parses the contents of a msh 4.1 ASCII file into a Mesh
///
/// Only triangles on 2D entities are kept. Each element is tagged with the
/// physical surface its entity belongs to; physical surfaces become the
/// mesh regions, ordered by physical tag.
pub fn parse_msh(contents: &str) -> Result<Mesh, HeaterError> {
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut physical_names: Vec<(usize, String)> = Vec::new();
    let mut surface_physical: HashMap<usize, usize> = HashMap::new();
    let mut tagged_nodes: Vec<(usize, Vertex)> = Vec::new();
    let mut raw_elements: Vec<([usize; 3], usize)> = Vec::new();

    while let Some(line) = lines.next() {
        let section = match MeshSection::from_header(line) {
            Some(s) => s,
            None => continue,
        };

        match section {
            MeshSection::Format => {
                let header = next_line(&mut lines, "MeshFormat")?;
                let fields: Vec<&str> = header.split_whitespace().collect();
                expect_len(&fields, 2, "MeshFormat")?;
                if !fields[0].starts_with('4') {
                    return Err(HeaterError::Mesher(format!(
                        "Unsupported mesh format version {}",
                        fields[0]
                    )));
                }
                if fields[1] != "0" {
                    return Err(HeaterError::Mesher(
                        "Only ASCII mesh files are supported".to_owned(),
                    ));
                }
            }
            MeshSection::PhysicalNames => {
                let count: Vec<usize> =
                    parse_fields(next_line(&mut lines, "PhysicalNames")?, "PhysicalNames")?;
                expect_len(&count, 1, "PhysicalNames")?;

                for _ in 0..count[0] {
                    let entry = next_line(&mut lines, "PhysicalNames")?;
                    let mut parts = entry.splitn(3, char::is_whitespace);
                    let dim: usize = parts
                        .next()
                        .and_then(|d| d.parse().ok())
                        .ok_or_else(|| HeaterError::Mesher(format!("Bad physical name '{entry}'")))?;
                    let tag: usize = parts
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| HeaterError::Mesher(format!("Bad physical name '{entry}'")))?;
                    let name = parts.next().unwrap_or("").trim().trim_matches('"');

                    if dim == 2 {
                        physical_names.push((tag, name.to_owned()));
                    }
                }
            }
            MeshSection::Entities => {
                let counts: Vec<usize> =
                    parse_fields(next_line(&mut lines, "Entities")?, "Entities")?;
                expect_len(&counts, 4, "Entities")?;

                for _ in 0..(counts[0] + counts[1]) {
                    next_line(&mut lines, "Entities")?;
                }
                for _ in 0..counts[2] {
                    let fields: Vec<&str> =
                        next_line(&mut lines, "Entities")?.split_whitespace().collect();
                    expect_len(&fields, 8, "Entities")?;
                    let ints = |s: &str| -> Result<usize, HeaterError> {
                        s.parse().map_err(|_| {
                            HeaterError::Mesher(format!("Unexpected value '{s}' in Entities"))
                        })
                    };
                    let tag = ints(fields[0])?;
                    let num_physical = ints(fields[7])?;
                    expect_len(&fields, 8 + num_physical, "Entities")?;
                    // an entity may carry several physical tags; the first wins
                    if num_physical > 0 {
                        surface_physical.insert(tag, ints(fields[8])?);
                    }
                }
                for _ in 0..counts[3] {
                    next_line(&mut lines, "Entities")?;
                }
            }
            MeshSection::Nodes => {
                let header: Vec<usize> = parse_fields(next_line(&mut lines, "Nodes")?, "Nodes")?;
                expect_len(&header, 2, "Nodes")?;
                tagged_nodes.reserve(header[1]);

                for _ in 0..header[0] {
                    let block: Vec<usize> =
                        parse_fields(next_line(&mut lines, "Nodes")?, "Nodes")?;
                    expect_len(&block, 4, "Nodes")?;
                    let num_nodes_local = block[3];

                    let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                    for _ in 0..num_nodes_local {
                        let tag: Vec<usize> =
                            parse_fields(next_line(&mut lines, "Nodes")?, "Nodes")?;
                        expect_len(&tag, 1, "Nodes")?;
                        node_tags.push(tag[0]);
                    }

                    for tag in node_tags {
                        let coords: Vec<f64> =
                            parse_fields(next_line(&mut lines, "Nodes")?, "Nodes")?;
                        expect_len(&coords, 2, "Nodes")?;
                        tagged_nodes.push((
                            tag,
                            Vertex {
                                x: coords[0],
                                y: coords[1],
                            },
                        ));
                    }
                }
            }
            MeshSection::Elements => {
                let header: Vec<usize> =
                    parse_fields(next_line(&mut lines, "Elements")?, "Elements")?;
                expect_len(&header, 2, "Elements")?;

                for _ in 0..header[0] {
                    let block: Vec<usize> =
                        parse_fields(next_line(&mut lines, "Elements")?, "Elements")?;
                    expect_len(&block, 4, "Elements")?;
                    let (entity_dim, entity_tag, element_type, num_elements) =
                        (block[0], block[1], block[2], block[3]);

                    if entity_dim == 2 && element_type != GMSH_TRIANGLE {
                        return Err(HeaterError::Mesher(format!(
                            "Unsupported element type {element_type} on surface {entity_tag}"
                        )));
                    }

                    for _ in 0..num_elements {
                        let line = next_line(&mut lines, "Elements")?;
                        if entity_dim != 2 {
                            continue;
                        }
                        let data: Vec<usize> = parse_fields(line, "Elements")?;
                        expect_len(&data, 4, "Elements")?;
                        raw_elements.push(([data[1], data[2], data[3]], entity_tag));
                    }
                }
            }
            MeshSection::Other => {
                // skip sections this parser has no use for
                let end = format!("$End{}", &line[1..]);
                for skipped in lines.by_ref() {
                    if skipped == end {
                        break;
                    }
                }
            }
        }
    }

    if raw_elements.is_empty() {
        return Err(HeaterError::Mesher("Mesh contains no triangles".to_owned()));
    }

    physical_names.sort_by_key(|(tag, _)| *tag);
    let region_of_physical: HashMap<usize, usize> = physical_names
        .iter()
        .enumerate()
        .map(|(idx, (tag, _))| (*tag, idx))
        .collect();

    // order nodes by tag
    tagged_nodes.sort_by_key(|(tag, _)| *tag);
    let node_index: HashMap<usize, usize> = tagged_nodes
        .iter()
        .enumerate()
        .map(|(idx, (tag, _))| (*tag, idx))
        .collect();

    let mut elements: Vec<Element> = Vec::with_capacity(raw_elements.len());
    for (node_tags, entity_tag) in raw_elements {
        let region = surface_physical
            .get(&entity_tag)
            .and_then(|physical| region_of_physical.get(physical))
            .ok_or_else(|| {
                HeaterError::Mesher(format!(
                    "Surface {entity_tag} does not belong to a named region"
                ))
            })?;

        let mut nodes = [0usize; 3];
        for (slot, tag) in nodes.iter_mut().zip(node_tags) {
            *slot = *node_index.get(&tag).ok_or_else(|| {
                HeaterError::Mesher(format!("Element references unknown node {tag}"))
            })?;
        }

        elements.push(Element {
            nodes,
            region: *region,
        });
    }

    let nodes: Vec<Node> = tagged_nodes
        .into_iter()
        .map(|(_, vertex)| Node {
            vertex,
            temperature: None,
        })
        .collect();

    Ok(Mesh {
        nodes,
        elements,
        region_names: physical_names.into_iter().map(|(_, name)| name).collect(),
    })
}

/// Parses a .msh file into a Mesh
///
/// # Arguments
/// * `mesh_file` - The path to the mesh file
fn parse_mesh(mesh_file: &Path) -> Result<Mesh, HeaterError> {
    let contents = match std::fs::read_to_string(mesh_file) {
        Ok(c) => c,
        Err(err) => {
            return Err(HeaterError::Mesher(format!(
                "Unable to open auto-generated mesh file: {err}"
            )))
        }
    };

    let mesh = parse_msh(&contents)?;

    println!(
        "info: loaded {} nodes and {} elements in {} regions",
        mesh.nodes.len(),
        mesh.elements.len(),
        mesh.region_names.len()
    );

    Ok(mesh)
}

/// Settings for a mesher run
#[derive(Debug, Clone)]
pub struct MesherSettings {
    pub gmsh: String,
    pub mesh_file: PathBuf,
    pub keep_mesh: bool,
}

/// Runs the mesher
///
/// # Arguments
/// * `geometry` - The validated region geometry
/// * `directives` - Per-region mesh resolutions
/// * `default_resolution_max` - The global maximum element size
/// * `settings` - Where and how to run gmsh
pub fn run(
    geometry: &Geometry,
    directives: &[(String, MeshDirective)],
    default_resolution_max: f64,
    settings: &MesherSettings,
) -> Result<Mesh, HeaterError> {
    compute_mesh(
        geometry,
        directives,
        default_resolution_max,
        &settings.gmsh,
        &settings.mesh_file,
    )?;

    let mesh = parse_mesh(&settings.mesh_file)?;

    if !settings.keep_mesh {
        if let Err(err) = std::fs::remove_file(&settings.mesh_file) {
            println!("warning [mesh]: failed to delete .msh file: {err}");
        }
    }

    Ok(mesh)
}
