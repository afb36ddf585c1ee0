use crate::{
    datatypes::{Element, Mesh, Node},
    error::HeaterError,
    fields::element_area,
    heating::HeatSources,
};
use argmin_observer_slog::SlogLogger;
use indicatif::ProgressBar;
use nalgebra::{matrix, SMatrix};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const MAX_CG_ITER: u64 = 1e6 as u64;
pub const TARGET_CG_COST: f64 = 1e-10;

/// Elements smaller than this fraction of the mean element area are rejected
const DEGENERATE_AREA_RATIO: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub max_iters: u64,
    /// Residual norm of the scaled, normalised system at which CG stops
    pub target_cost: f64,
    /// Logs every CG iteration through slog
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iters: MAX_CG_ITER,
            target_cost: TARGET_CG_COST,
            verbose: false,
        }
    }
}

/// Steady-state temperature on the mesh nodes
#[derive(Debug)]
pub struct ThermalSolution {
    pub iterations: u64,
    pub max_temperature: f64,
}

/// Runs multiplication for Conjugate Gradient Solver
struct SparseOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for SparseOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self
            .a
            .row_iter()
            .map(|row| {
                row.col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(&col, &value)| value * x[col])
                    .sum::<f64>()
            })
            .collect())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    start_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            start_mag: None,
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost();
        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }
        let cost_mag = cost.log10();
        let start_mag = *self.start_mag.get_or_insert(cost_mag);
        if start_mag <= self.final_mag {
            return Ok(());
        }

        let fraction = ((start_mag - cost_mag) / (start_mag - self.final_mag)).clamp(0.0, 1.0);
        self.bar.set_position((1000.0 * fraction) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A sparse symmetric positive definite matrix
/// * `b` - The right hand side of the system
/// * `settings` - Iteration limit, target residual and logging
///
/// # Returns
/// The approximate solution and the number of iterations used
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: Vec<f64>,
    settings: &SolverSettings,
) -> Result<(Vec<f64>, u64), HeaterError> {
    let initial_guess: Vec<f64> = vec![0.0; b.len()];
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b);

    let operator = SparseOperator { a };
    let observer = ConjugateGradientObserverBar::new(settings.target_cost);

    let mut executor = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(settings.max_iters)
                .target_cost(settings.target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest);
    if settings.verbose {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }

    // Run solver
    let res = match executor.run() {
        Ok(r) => r,
        Err(err) => {
            return Err(HeaterError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let state = res.state();
    if state.get_best_cost() > settings.target_cost {
        println!(
            "warning [solver]: conjugate gradient stopped at residual {:e} after {} iterations",
            state.get_best_cost(),
            state.get_iter()
        );
    }

    let best_param = match &state.best_param {
        Some(vec) => vec.clone(),
        None => {
            return Err(HeaterError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    Ok((best_param, state.get_iter()))
}

/// Calculates the gradient matrix of the linear shape functions
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
/// * `element_area` - The signed area of the element
///
/// # Returns
/// A 2x3 matrix whose columns are the shape function gradients
fn compute_gradient_matrix(
    element: &Element,
    nodes: &[Node],
    element_area: f64,
) -> SMatrix<f64, 2, 3> {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut gradient_mat: SMatrix<f64, 2, 3> = matrix![
        beta_1, beta_2, beta_3;
        gamma_1, gamma_2, gamma_3;
    ];

    gradient_mat /= 2.0 * element_area;

    gradient_mat
}

/// Computes the conduction matrix for a given element
///
/// # Arguments
/// * `element` - The element to target
/// * `nodes` - A reference to the vector of nodes
/// * `conductivity` - The thermal conductivity of the element
///
/// # Returns
/// A 3x3 conduction matrix for the element
fn compute_element_conduction_matrix(
    element: &Element,
    nodes: &[Node],
    conductivity: f64,
) -> SMatrix<f64, 3, 3> {
    let area = element_area(element, nodes);
    let gradient_mat = compute_gradient_matrix(element, nodes, area);

    gradient_mat.transpose() * gradient_mat * (conductivity * area.abs())
}

/// Marks nodes held at zero temperature rise: the outer boundary of the
/// window and nodes no element touches
///
/// # Returns
/// The equation index of every free node, `None` for fixed nodes, and the
/// number of free nodes
fn number_free_nodes(mesh: &Mesh) -> (Vec<Option<usize>>, usize) {
    let mut referenced = vec![false; mesh.nodes.len()];
    for element in &mesh.elements {
        for idx in element.nodes {
            referenced[idx] = true;
        }
    }

    let (mut x_min, mut x_max) = (f64::MAX, f64::MIN);
    let (mut y_min, mut y_max) = (f64::MAX, f64::MIN);
    for (node, _) in std::iter::zip(&mesh.nodes, &referenced).filter(|(_, r)| **r) {
        x_min = x_min.min(node.vertex.x);
        x_max = x_max.max(node.vertex.x);
        y_min = y_min.min(node.vertex.y);
        y_max = y_max.max(node.vertex.y);
    }
    let tolerance = 1e-9 * (x_max - x_min).max(y_max - y_min).abs().max(1.0);

    let on_boundary = |node: &Node| {
        node.vertex.x - x_min <= tolerance
            || x_max - node.vertex.x <= tolerance
            || node.vertex.y - y_min <= tolerance
            || y_max - node.vertex.y <= tolerance
    };

    let mut free: Vec<Option<usize>> = Vec::with_capacity(mesh.nodes.len());
    let mut num_free = 0;
    for (node, is_referenced) in std::iter::zip(&mesh.nodes, &referenced) {
        if *is_referenced && !on_boundary(node) {
            free.push(Some(num_free));
            num_free += 1;
        } else {
            free.push(None);
        }
    }

    (free, num_free)
}

/// Assembles the conduction matrix and Joule heating load of the free nodes
///
/// # Returns
/// The matrix triplets, the matrix diagonal and the load vector
fn assemble(
    mesh: &Mesh,
    conductivity: &[f64],
    heat_generation: &[f64],
    free: &[Option<usize>],
    num_free: usize,
) -> Result<(Vec<(usize, usize, f64)>, Vec<f64>, Vec<f64>), HeaterError> {
    let mean_area = mesh
        .elements
        .iter()
        .map(|e| element_area(e, &mesh.nodes).abs())
        .sum::<f64>()
        / mesh.elements.len() as f64;

    let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(9 * mesh.elements.len());
    let mut diagonal: Vec<f64> = vec![0.0; num_free];
    let mut load: Vec<f64> = vec![0.0; num_free];

    let bar = ProgressBar::new(mesh.elements.len() as u64);
    for (i, (element, k)) in std::iter::zip(&mesh.elements, conductivity).enumerate() {
        bar.inc(1);

        let area = element_area(element, &mesh.nodes).abs();
        if area <= DEGENERATE_AREA_RATIO * mean_area {
            return Err(HeaterError::Solver(format!(
                "Element {i} is degenerate (area {area:e})"
            )));
        }

        let conduction_mat = compute_element_conduction_matrix(element, &mesh.nodes, *k);
        let q = heat_generation[element.region];

        for (local_row, node_row) in element.nodes.iter().enumerate() {
            let global_row = match free[*node_row] {
                Some(row) => row,
                None => continue,
            };

            load[global_row] += q * area / 3.0;

            for (local_col, node_col) in element.nodes.iter().enumerate() {
                if let Some(global_col) = free[*node_col] {
                    let value = conduction_mat[(local_row, local_col)];
                    triplets.push((global_row, global_col, value));
                    if global_row == global_col {
                        diagonal[global_row] += value;
                    }
                }
            }
        }
    }
    bar.finish_with_message("info: successfully built conduction matrix\n");

    Ok((triplets, diagonal, load))
}

/// Solves for the temperature rise in the nodes. Loads the results into the
/// node objects
///
/// The system is Jacobi scaled and normalised by the load norm before the
/// conjugate gradient solve.
///
/// # Arguments
/// * `mesh` - The mesh; its nodes receive the temperature
/// * `conductivity` - The per-element thermal conductivity
/// * `sources` - Current density and specific conductivity of source regions
/// * `settings` - Solver settings
pub fn run(
    mesh: &mut Mesh,
    conductivity: &[f64],
    sources: &HeatSources,
    settings: &SolverSettings,
) -> Result<ThermalSolution, HeaterError> {
    if conductivity.len() != mesh.elements.len() {
        return Err(HeaterError::Solver(format!(
            "Conductivity has {} values for {} elements",
            conductivity.len(),
            mesh.elements.len()
        )));
    }
    if mesh.elements.is_empty() {
        return Err(HeaterError::Solver("Mesh has no elements".to_owned()));
    }
    let heat_generation = sources.per_region(mesh)?;

    let (free, num_free) = number_free_nodes(mesh);
    println!(
        "info: {} unknowns, {} nodes held at the heat sink",
        num_free,
        mesh.nodes.len() - num_free
    );

    println!("info: building conduction matrix...");
    let (triplets, diagonal, load) =
        assemble(mesh, conductivity, &heat_generation, &free, num_free)?;

    let mut temperatures = vec![0.0; mesh.nodes.len()];
    let mut iterations = 0;

    let scale: Vec<f64> = diagonal
        .iter()
        .enumerate()
        .map(|(i, d)| {
            if *d > 0.0 {
                Ok(1.0 / d.sqrt())
            } else {
                Err(HeaterError::Solver(format!(
                    "Unknown {i} has no conduction; check the conductivity field"
                )))
            }
        })
        .collect::<Result<_, _>>()?;

    let scaled_load: Vec<f64> = std::iter::zip(&load, &scale).map(|(f, s)| f * s).collect();
    let load_norm = scaled_load.iter().map(|f| f * f).sum::<f64>().sqrt();

    if load_norm > 0.0 && num_free > 0 {
        let mut coo: CooMatrix<f64> = CooMatrix::new(num_free, num_free);
        for (row, col, value) in triplets {
            coo.push(row, col, value * scale[row] * scale[col]);
        }
        let system = CsrMatrix::from(&coo);

        let rhs: Vec<f64> = scaled_load.iter().map(|f| f / load_norm).collect();

        let start = std::time::Instant::now();
        println!("info: solving...");
        let (solution, iters) = run_conjugate_gradient(&system, rhs, settings)?;
        let elapsed = (std::time::Instant::now() - start).as_secs_f32();
        println!("info: solved system in {:.3} seconds", elapsed);

        for (node_idx, dof) in free.iter().enumerate() {
            if let Some(dof) = dof {
                temperatures[node_idx] = solution[*dof] * scale[*dof] * load_norm;
            }
        }
        iterations = iters;
    } else {
        println!("warning [solver]: no heat load, temperature is uniform");
    }

    if temperatures.iter().any(|t| !t.is_finite()) {
        return Err(HeaterError::Solver(
            "Solution contains non-finite temperatures".to_owned(),
        ));
    }

    // Load results into nodes
    for (node, t) in std::iter::zip(mesh.nodes.iter_mut(), &temperatures) {
        node.temperature = Some(*t);
    }

    let max_temperature = temperatures.iter().cloned().fold(f64::MIN, f64::max);

    println!("info: solve complete");

    Ok(ThermalSolution {
        iterations,
        max_temperature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Vertex;

    /// Unit square of `n` x `n` cells, each split along its rising diagonal
    fn structured_square(n: usize) -> Mesh {
        let h = 1.0 / n as f64;
        let mut nodes = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                nodes.push(Node {
                    vertex: Vertex {
                        x: i as f64 * h,
                        y: j as f64 * h,
                    },
                    temperature: None,
                });
            }
        }

        let idx = |i: usize, j: usize| j * (n + 1) + i;
        let mut elements = Vec::new();
        for j in 0..n {
            for i in 0..n {
                elements.push(Element {
                    nodes: [idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)],
                    region: 0,
                });
                elements.push(Element {
                    nodes: [idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)],
                    region: 0,
                });
            }
        }

        Mesh {
            nodes,
            elements,
            region_names: vec!["slab".to_owned()],
        }
    }

    fn tight_settings() -> SolverSettings {
        SolverSettings {
            target_cost: 1e-13,
            ..SolverSettings::default()
        }
    }

    #[test]
    fn conduction_matrix_rows_sum_to_zero() {
        let mesh = structured_square(1);
        let conduction = compute_element_conduction_matrix(&mesh.elements[0], &mesh.nodes, 3.0);
        for row in 0..3 {
            let sum: f64 = (0..3).map(|col| conduction[(row, col)]).sum();
            assert!(sum.abs() < 1e-12);
        }
        assert!((conduction - conduction.transpose()).norm() < 1e-12);
    }

    #[test]
    fn orientation_does_not_change_conduction() {
        let mesh = structured_square(1);
        let flipped = Element {
            nodes: [
                mesh.elements[0].nodes[0],
                mesh.elements[0].nodes[2],
                mesh.elements[0].nodes[1],
            ],
            region: 0,
        };
        let a = compute_element_conduction_matrix(&mesh.elements[0], &mesh.nodes, 1.0);
        let b = compute_element_conduction_matrix(&flipped, &mesh.nodes, 1.0);
        assert!((a[(0, 0)] - b[(0, 0)]).abs() < 1e-12);
        assert!((a[(1, 1)] - b[(2, 2)]).abs() < 1e-12);
    }

    /// Centre value of `-lap(T) = 1` on the unit square with `T = 0` on
    /// the boundary
    const UNIT_SQUARE_CENTRE: f64 = 0.0736713532814;

    fn centre_temperature(n: usize) -> f64 {
        let mut mesh = structured_square(n);
        let conductivity = vec![2.0; mesh.elements.len()];
        // q = J^2 / sigma = 4
        let sources = HeatSources::uniform(&["slab".to_owned()], 1.0, 2.0);

        run(&mut mesh, &conductivity, &sources, &tight_settings()).unwrap();

        let centre = (n / 2) * (n + 1) + n / 2;
        mesh.nodes[centre].temperature.unwrap()
    }

    #[test]
    fn matches_five_point_stencil_on_structured_mesh() {
        // right triangles reduce P1 to the 5-point stencil, 9/64 at n = 4
        let actual = centre_temperature(4);
        assert!((actual - 0.140625).abs() < 1e-8, "centre = {actual}");
    }

    #[test]
    fn converges_to_heated_square_solution() {
        let expected = 2.0 * UNIT_SQUARE_CENTRE;
        let errors: Vec<f64> = [4, 8, 16]
            .iter()
            .map(|n| (centre_temperature(*n) - expected).abs())
            .collect();

        for pair in errors.windows(2) {
            assert!(pair[0] > 3.0 * pair[1], "errors {errors:?}");
        }
        assert!(errors[2] < 1e-3, "errors {errors:?}");
    }

    #[test]
    fn heat_sink_nodes_stay_at_zero() {
        let mut mesh = structured_square(3);
        let conductivity = vec![1.0; mesh.elements.len()];
        let sources = HeatSources::uniform(&["slab".to_owned()], 1.0, 1.0);

        let solution = run(&mut mesh, &conductivity, &sources, &tight_settings()).unwrap();
        assert!(solution.iterations > 0);

        let on_boundary = |n: &Node| {
            n.vertex.x == 0.0 || n.vertex.x == 1.0 || n.vertex.y == 0.0 || n.vertex.y == 1.0
        };
        for node in mesh.nodes.iter().filter(|n| on_boundary(*n)) {
            assert_eq!(node.temperature, Some(0.0));
        }
        for node in mesh.nodes.iter().filter(|n| !on_boundary(*n)) {
            assert!(node.temperature.unwrap() > 0.0);
        }
    }

    #[test]
    fn no_source_gives_zero_field() {
        let mut mesh = structured_square(2);
        let conductivity = vec![1.0; mesh.elements.len()];

        let solution = run(
            &mut mesh,
            &conductivity,
            &HeatSources::default(),
            &SolverSettings::default(),
        )
        .unwrap();

        assert_eq!(solution.iterations, 0);
        assert_eq!(solution.max_temperature, 0.0);
        assert!(mesh.nodes.iter().all(|n| n.temperature == Some(0.0)));
    }

    #[test]
    fn rejects_mismatched_conductivity() {
        let mut mesh = structured_square(2);
        let result = run(
            &mut mesh,
            &[1.0],
            &HeatSources::default(),
            &SolverSettings::default(),
        );
        assert!(matches!(result, Err(HeaterError::Solver(_))));
    }

    #[test]
    fn rejects_degenerate_element() {
        let mut mesh = structured_square(2);
        let collapsed = mesh.elements[0].nodes[0];
        mesh.elements[0].nodes[1] = collapsed;
        let conductivity = vec![1.0; mesh.elements.len()];
        let sources = HeatSources::uniform(&["slab".to_owned()], 1.0, 1.0);

        assert!(run(&mut mesh, &conductivity, &sources, &SolverSettings::default()).is_err());
    }
}
