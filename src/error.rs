use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error("Invalid cascade model: {0}")]
    ModelParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input image: {0}")]
    Input(String),

    #[error("No faces detected")]
    NoDetections,

    #[error("{detections} face(s) detected but none cleared the confidence threshold")]
    NoOverlaysDrawn { detections: usize },
}

impl Error {
    /// Whether the run failed because of the image content rather than a
    /// broken model, configuration or input. Callers report these to the
    /// end user instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoDetections | Error::NoOverlaysDrawn { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
