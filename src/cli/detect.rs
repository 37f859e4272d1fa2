use anyhow::Result;

use hostforge::config::Settings;
use hostforge::detect::Detector;

use crate::output;

pub async fn run(settings: &Settings, json: bool) -> Result<()> {
    let detector = Detector::new(settings.detector.clone(), &settings.kubernetes.kubectl);

    let spinner = output::create_spinner("Probing environment...");
    let detection = detector.detect().await;
    spinner.finish_and_clear();

    if json {
        let value = serde_json::json!({
            "topology": detection.topology,
            "cloud": detection.cloud,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    output::header("Environment");
    output::field("topology", detection.topology.as_str());
    output::field("cloud", detection.cloud.as_str());
    Ok(())
}
