/// Figure requests for the external plotting job.
///
/// Rendering happens outside this service. Each request is written as JSON
/// to the figure directory, named after its kind and start time, where the
/// plotting job picks it up. No image exists yet when the alert goes out, so
/// the outcome is `Skipped` and the alert is sent without an attachment.

use std::path::{Path, PathBuf};

use crate::alert::FigureRequest;
use crate::logging::{self, Subsystem};
use crate::notify::{FigureOutcome, FigureRenderer};

pub struct RequestFileRenderer {
    dir: PathBuf,
}

impl RequestFileRenderer {
    pub fn new(dir: &Path) -> Self {
        RequestFileRenderer { dir: dir.to_path_buf() }
    }

    pub fn request_path(&self, request: &FigureRequest) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            request.kind.as_str(),
            request.starttime.format("%Y%m%dT%H%M%S")
        ))
    }

    fn write(&self, alarm_name: &str, request: &FigureRequest) -> Result<PathBuf, String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| format!("{}: {}", self.dir.display(), e))?;
        let path = self.request_path(request);
        let body = serde_json::json!({
            "alarm_name": alarm_name,
            "request": request,
        });
        let text = serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?;
        std::fs::write(&path, text).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(path)
    }
}

impl FigureRenderer for RequestFileRenderer {
    fn render(&self, alarm_name: &str, request: &FigureRequest) -> FigureOutcome {
        match self.write(alarm_name, request) {
            Ok(path) => {
                logging::info(
                    Subsystem::Notify,
                    Some(alarm_name),
                    &format!("figure request written to {}", path.display()),
                );
                FigureOutcome::Skipped
            }
            Err(msg) => {
                logging::warn(Subsystem::Notify, Some(alarm_name), &format!("figure request failed: {}", msg));
                FigureOutcome::Failed(msg)
            }
        }
    }
}
