use anyhow::{Context, Result};
use terramosaic::bounds::format_coordinates;
use terramosaic::collaborators::WeatherLookup;
use terramosaic::OpenWeatherClient;

pub fn run(lat: f64, lon: f64, api_key: Option<&str>, json: bool) -> Result<()> {
    let api_key = api_key.context(
        "No weather API key. Use --api-key or set TERRAMOSAIC_WEATHER_API_KEY",
    )?;
    let client = OpenWeatherClient::new(api_key).context("Failed to create HTTP client")?;

    let report = client.current(lat, lon)?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    let show = |value: Option<f64>, unit: &str| match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "n/a".to_string(),
    };

    println!("Location:    {}", format_coordinates(lat, lon));
    println!("Conditions:  {}", report.description);
    println!("Temperature: {}", show(report.temperature, " °F"));
    println!("Feels like:  {}", show(report.feels_like, " °F"));
    println!("Humidity:    {}", show(report.humidity, "%"));
    println!("Wind:        {}", show(report.wind_speed, " mph"));

    if !report.alerts.is_empty() {
        println!();
        println!("Alerts:");
        for alert in &report.alerts {
            println!("  {}", alert.event.as_deref().unwrap_or("Unnamed alert"));
            if let Some(description) = &alert.description {
                println!("    {}", description);
            }
        }
    }

    Ok(())
}
