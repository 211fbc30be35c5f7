//! Session client example
//!
//! Usage:
//!   INTERVIEWPREP_API_BASE_URL=http://localhost:8080/api \
//!   ACCESS_TOKEN=... REFRESH_TOKEN=... \
//!   cargo run --example session_client

use interviewprep_client::{ApiClient, ClientConfig, LoginResponse, SessionEvent, SessionMonitor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_env()?;
    println!("=== InterviewPrep Client Example ===");
    println!("API: {}", config.api_base_url);
    println!();

    let client = ApiClient::new(config)?;

    // Top-level shell: one monitor plus a logging subscriber
    let monitor = SessionMonitor::attach(client.events());
    let _logger = client.events().subscribe(|event| match event {
        SessionEvent::SessionExpired => println!("! Session expired, please log in again"),
        SessionEvent::AccessForbidden { detail } => {
            println!("! {} {} forbidden: {}", detail.method, detail.url, detail.message)
        }
    });

    if let (Ok(access_token), Ok(refresh_token)) = (std::env::var("ACCESS_TOKEN"), std::env::var("REFRESH_TOKEN")) {
        client.login(LoginResponse {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            user: None,
        })?;
    }

    let session = client.session();
    println!("Authenticated: {}", session.is_authenticated);
    println!("Role: {}", session.role.as_deref().unwrap_or("-"));
    println!("Landing page: {}", session.landing_path());
    println!();

    println!("Fetching profile...");
    match client.get_json::<serde_json::Value>("/user/profile").await {
        Ok(profile) => println!("✓ Profile: {profile}"),
        Err(e) => println!("✗ Request failed ({:?}): {e}", e.kind()),
    }

    let state = monitor.state();
    if state.session_expired {
        println!("Redirect to {}", monitor.dismiss_session_expired());
    }
    if state.access_forbidden {
        println!("Permission denied: {}", state.forbidden_message);
        monitor.dismiss_access_forbidden();
    }

    Ok(())
}
