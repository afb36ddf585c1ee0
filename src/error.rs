use std::fmt::Display;

#[derive(Debug)]
pub enum HeaterError {
    Input(String),
    Geometry(String),
    Mesher(String),
    Solver(String),
    PostProcessor(String),
}

impl Display for HeaterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            HeaterError::Input(v) => ("Input", v),
            HeaterError::Geometry(v) => ("Geometry", v),
            HeaterError::Mesher(v) => ("Mesher", v),
            HeaterError::Solver(v) => ("Solver", v),
            HeaterError::PostProcessor(v) => ("Post Processor", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for HeaterError {}
