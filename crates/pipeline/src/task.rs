//! Task-control handler
//!
//! A task names a region and two dates. The handler composites a "before"
//! window ending at the start date and an "after" window ending at the end
//! date, reports status transitions and posts the result locations.

use chrono::NaiveDate;
use geo_types::MultiPolygon;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use clearsky_cloud::{CloudError, HttpClient};
use clearsky_core::BBox;

use crate::config::{HttpConfig, TaskApiConfig};
use crate::error::{PipelineError, Result};
use crate::geometry::{envelope, parse_geometry};
use crate::pipeline::{AcquisitionWindow, Pipeline, WindowOutput};

/// Status values understood by the task API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Failed,
    Complete,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskRegion {
    /// `FeatureCollection` (first feature used) or `Polygon`
    pub geojson: Value,
}

/// Parameters of a forest-change task
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskParams {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub region: TaskRegion,
}

impl TaskParams {
    pub fn geometry(&self) -> Result<MultiPolygon<f64>> {
        parse_geometry(&self.region.geojson)
            .ok_or_else(|| PipelineError::Task("region is not a GeoJSON polygon or feature collection".into()))
    }

    /// Geographic bounds of the region
    pub fn bbox(&self) -> Result<BBox> {
        envelope(&self.geometry()?).ok_or_else(|| PipelineError::Task("region has an empty extent".into()))
    }
}

/// Values posted when a task completes. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskResults {
    pub gain_area: Option<f64>,
    pub loss_area: Option<f64>,
    pub total_area: Option<f64>,
    pub before_rgb_href: Option<String>,
    pub after_rgb_href: Option<String>,
    pub change_href: Option<String>,
}

impl TaskResults {
    fn form(&self, task_uid: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![("task_uid", task_uid.to_string())];
        let numbers = [
            ("gain_area", self.gain_area),
            ("loss_area", self.loss_area),
            ("total_area", self.total_area),
        ];
        form.extend(numbers.into_iter().filter_map(|(k, v)| Some((k, v?.to_string()))));
        let hrefs = [
            ("before_rgb_tiles_href", &self.before_rgb_href),
            ("after_rgb_tiles_href", &self.after_rgb_href),
            ("change_tiles_href", &self.change_href),
        ];
        form.extend(hrefs.into_iter().filter_map(|(k, v)| Some((k, v.clone()?))));
        form
    }
}

/// The remote task service
pub trait TaskControl {
    fn task_params(&self, task_uid: &str) -> Result<TaskParams>;
    fn update_status(&self, task_uid: &str, status: TaskStatus, message: &str) -> Result<()>;
    fn post_results(&self, task_uid: &str, results: &TaskResults) -> Result<()>;
}

/// [`TaskControl`] over the HTTP task API
pub struct HttpTaskControl {
    rt: tokio::runtime::Runtime,
    client: HttpClient,
    base_url: String,
    task_type: String,
}

impl HttpTaskControl {
    pub fn new(api: &TaskApiConfig, http: &HttpConfig) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            rt,
            client: HttpClient::new(http.timeout(), http.max_retries)?,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            task_type: api.task_type.clone(),
        })
    }

    fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        self.rt.block_on(async {
            let resp = self.client.execute_with_retry(request).await?;
            let status = resp.status();
            let url = resp.url().to_string();
            let body = resp.text().await.map_err(CloudError::from)?;
            if !status.is_success() {
                return Err(PipelineError::Task(format!("{url} returned {status}: {body}")));
            }
            Ok::<_, PipelineError>(body)
        })
    }
}

impl TaskControl for HttpTaskControl {
    fn task_params(&self, task_uid: &str) -> Result<TaskParams> {
        let url = format!("{}/tasks/get_forest_change_task_params", self.base_url);
        let body = self.send(self.client.inner().get(url).query(&[("task_uid", task_uid)]))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn update_status(&self, task_uid: &str, status: TaskStatus, message: &str) -> Result<()> {
        let url = format!("{}/tasks/update_task_status/", self.base_url);
        let form = [
            ("task_uid", task_uid),
            ("task_type", self.task_type.as_str()),
            ("status", status.as_str()),
            ("message", message),
        ];
        self.send(self.client.inner().post(url).form(&form))?;
        Ok(())
    }

    fn post_results(&self, task_uid: &str, results: &TaskResults) -> Result<()> {
        let url = format!("{}/tasks/update_forest_change_task/", self.base_url);
        self.send(self.client.inner().post(url).form(&results.form(task_uid)))?;
        Ok(())
    }
}

/// Both composites of a finished task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub before: WindowOutput,
    pub after: WindowOutput,
}

impl TaskOutcome {
    /// Local paths of the RGB previews (composites when no preview exists).
    /// Change statistics stay empty: no change classifier runs here.
    pub fn results(&self) -> TaskResults {
        let href = |w: &WindowOutput| {
            w.preview
                .as_ref()
                .unwrap_or(&w.composite)
                .display()
                .to_string()
        };
        TaskResults {
            before_rgb_href: Some(href(&self.before)),
            after_rgb_href: Some(href(&self.after)),
            ..TaskResults::default()
        }
    }
}

/// The two windows of a task
pub fn task_windows(pipeline: &Pipeline, params: &TaskParams) -> Result<[AcquisitionWindow; 2]> {
    if params.end_date <= params.start_date {
        return Err(PipelineError::InvalidDateRange {
            start: params.start_date,
            end: params.end_date,
        });
    }
    let w = &pipeline.config().windows;
    Ok([
        AcquisitionWindow::ending_at("before", params.start_date, w.days_buffer, w.before_cloud_cover),
        AcquisitionWindow::ending_at("after", params.end_date, w.days_buffer, w.after_cloud_cover),
    ])
}

fn run_windows(pipeline: &mut Pipeline, control: &dyn TaskControl, task_uid: &str) -> Result<TaskOutcome> {
    let params = control.task_params(task_uid)?;
    let bbox = params.bbox()?;
    info!(task = task_uid, %bbox, start = %params.start_date, end = %params.end_date, "task parameters");

    let [before, after] = task_windows(pipeline, &params)?;
    let before = pipeline.run_window(&before, &bbox)?;
    let after = pipeline.run_window(&after, &bbox)?;
    Ok(TaskOutcome { before, after })
}

/// Run a task end to end, keeping the remote status in sync.
///
/// On failure the task is marked failed with [`PipelineError::user_message`]
/// and the original error is returned.
pub fn run_task(pipeline: &mut Pipeline, control: &dyn TaskControl, task_uid: &str) -> Result<TaskOutcome> {
    control.update_status(task_uid, TaskStatus::Running, "")?;

    match run_windows(pipeline, control, task_uid) {
        Ok(outcome) => {
            control.post_results(task_uid, &outcome.results())?;
            control.update_status(task_uid, TaskStatus::Complete, "")?;
            info!(task = task_uid, "task complete");
            Ok(outcome)
        }
        Err(e) => {
            error!(task = task_uid, error = %e, "task failed");
            if let Err(status_err) = control.update_status(task_uid, TaskStatus::Failed, &e.user_message()) {
                warn!(task = task_uid, error = %status_err, "could not report task failure");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SceneCatalog, SearchRequest};
    use crate::config::PipelineConfig;
    use crate::download::tests::FakeReader;
    use crate::error::CatalogError;
    use crate::scene::Scene;
    use serde_json::json;
    use std::cell::RefCell;

    fn params_json(geojson: Value) -> Value {
        json!({
            "start_date": "2021-01-15",
            "end_date": "2022-01-15",
            "region": { "geojson": geojson }
        })
    }

    fn polygon() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[36.80, -1.30], [36.82, -1.30], [36.82, -1.28], [36.80, -1.28], [36.80, -1.30]]]
        })
    }

    #[test]
    fn test_params_polygon_and_feature_collection() {
        let p: TaskParams = serde_json::from_value(params_json(polygon())).unwrap();
        assert_eq!(p.start_date, NaiveDate::from_ymd_opt(2021, 1, 15).unwrap());
        let bbox = p.bbox().unwrap();
        assert!(bbox.approx_eq(&BBox::new(36.80, -1.30, 36.82, -1.28), 1e-12));

        let fc = json!({ "type": "FeatureCollection", "features": [{ "type": "Feature", "geometry": polygon() }] });
        let p: TaskParams = serde_json::from_value(params_json(fc)).unwrap();
        assert!(p.bbox().unwrap().approx_eq(&bbox, 1e-12));

        let point = json!({ "type": "Point", "coordinates": [0, 0] });
        let p: TaskParams = serde_json::from_value(params_json(point)).unwrap();
        assert!(matches!(p.bbox(), Err(PipelineError::Task(_))));
    }

    #[test]
    fn test_results_form_skips_unset_fields() {
        let results = TaskResults {
            before_rgb_href: Some("/tmp/before.tif".into()),
            total_area: Some(520.0),
            ..TaskResults::default()
        };
        let form = results.form("uid");
        assert_eq!(
            form,
            vec![
                ("task_uid", "uid".to_string()),
                ("total_area", "520".to_string()),
                ("before_rgb_tiles_href", "/tmp/before.tif".to_string()),
            ]
        );
    }

    struct RecordingControl {
        params: Value,
        statuses: RefCell<Vec<(TaskStatus, String)>>,
    }

    impl TaskControl for RecordingControl {
        fn task_params(&self, _task_uid: &str) -> Result<TaskParams> {
            Ok(serde_json::from_value(self.params.clone())?)
        }

        fn update_status(&self, _task_uid: &str, status: TaskStatus, message: &str) -> Result<()> {
            self.statuses.borrow_mut().push((status, message.to_string()));
            Ok(())
        }

        fn post_results(&self, _task_uid: &str, _results: &TaskResults) -> Result<()> {
            panic!("no results expected");
        }
    }

    struct EmptyCatalog;

    impl SceneCatalog for EmptyCatalog {
        fn search(&self, _request: &SearchRequest) -> std::result::Result<Vec<Scene>, CatalogError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_failed_task_reports_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            work_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::new(config, Box::new(EmptyCatalog), Box::new(FakeReader::clear(1000.0))).unwrap();
        let control = RecordingControl {
            params: params_json(polygon()),
            statuses: RefCell::new(Vec::new()),
        };

        let err = run_task(&mut pipeline, &control, "uid").unwrap_err();
        assert!(matches!(err, PipelineError::BackoffExhausted { .. }));
        let statuses = control.statuses.borrow();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].0, TaskStatus::Running);
        assert_eq!(statuses[1].0, TaskStatus::Failed);
        assert!(statuses[1].1.contains("No satellite imagery"));
    }

    #[test]
    fn test_task_windows() {
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            Box::new(EmptyCatalog),
            Box::new(FakeReader::clear(1000.0)),
        )
        .unwrap();
        let p: TaskParams = serde_json::from_value(params_json(polygon())).unwrap();
        let [before, after] = task_windows(&pipeline, &p).unwrap();
        assert_eq!(before.end, p.start_date);
        assert_eq!((before.end - before.start).num_days(), 70);
        assert_eq!(before.initial_cloud_cover, 30.0);
        assert_eq!(after.end, p.end_date);
        assert_eq!(after.initial_cloud_cover, 24.0);

        let swapped = TaskParams {
            start_date: p.end_date,
            end_date: p.start_date,
            ..p
        };
        assert!(matches!(
            task_windows(&pipeline, &swapped),
            Err(PipelineError::InvalidDateRange { .. })
        ));
    }
}
