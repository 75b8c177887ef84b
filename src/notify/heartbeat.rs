/// Icinga2 passive check results.
///
/// Each alarm is a passive service in Icinga2; a run reports its state by
/// POSTing a `process-check-result` action for that service.

use std::time::Duration;

use serde_json::{Value, json};

use crate::alert::HeartbeatState;
use crate::logging::{self, Subsystem};
use crate::model::AlarmError;
use crate::notify::HeartbeatReporter;

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct IcingaReporter {
    url: String,
    username: String,
    password: String,
    host_name: String,
    client: reqwest::blocking::Client,
}

impl IcingaReporter {
    /// `url` is the full `.../v1/actions/process-check-result` endpoint.
    pub fn new(url: &str, username: &str, password: &str, host_name: &str) -> Result<Self, AlarmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(IcingaReporter {
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host_name: host_name.to_string(),
            client,
        })
    }
}

/// Request body for one check result.
pub fn check_result_body(host_name: &str, service: &str, state: HeartbeatState, message: &str) -> Value {
    json!({
        "type": "Service",
        "filter": format!("host.name==\"{}\" && service.name==\"{}\"", host_name, service),
        "exit_status": state.code(),
        "plugin_output": message,
    })
}

impl HeartbeatReporter for IcingaReporter {
    fn report(&self, service: &str, state: HeartbeatState, message: &str) -> Result<(), AlarmError> {
        let body = check_result_body(&self.host_name, service, state, message);
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(AlarmError::Upstream(format!("Icinga2 returned {}", response.status())));
        }
        logging::info(Subsystem::Notify, Some(service), &format!("heartbeat {} sent", state));
        Ok(())
    }
}
