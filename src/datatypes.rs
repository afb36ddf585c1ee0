#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// A named material region of the cross-section. The polygon is implicitly
/// closed; the last vertex connects back to the first.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub polygon: Vec<Vertex>,
}

#[derive(Debug)]
pub struct Node {
    pub vertex: Vertex,
    pub temperature: Option<f64>,
}

#[derive(Debug)]
pub struct Element {
    pub nodes: [usize; 3],
    /// Index into `Mesh::region_names`
    pub region: usize,
}

#[derive(Debug)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    pub region_names: Vec<String>,
}

impl Mesh {
    /// Looks up the index of a region by name
    pub fn region_index(&self, name: &str) -> Option<usize> {
        self.region_names.iter().position(|n| n == name)
    }
}

/// Meshing directive for a single region
#[derive(Debug, Clone, Copy)]
pub struct MeshDirective {
    /// Maximum element edge length inside the region
    pub resolution: f64,
    /// Distance over which the resolution is graded into the default size
    pub distance: f64,
}
