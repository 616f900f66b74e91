use crate::domain::errors::RouteError;
use crate::domain::models::{Direction, NavigationStep};
use crate::domain::ports::RouteProvider;
use tracing::debug;

/// Offline route used when no directions backend is configured.
///
/// Always returns the same five steps, with the destination spliced into the
/// final instruction.
#[derive(Debug, Default, Clone)]
pub struct DemoRouteProvider;

impl RouteProvider for DemoRouteProvider {
    async fn fetch_route(&self, destination: &str) -> Result<Vec<NavigationStep>, RouteError> {
        debug!("Using demo route for destination {:?}", destination);

        Ok(vec![
            NavigationStep::new(Direction::Straight, "0.5 mi", "Head north on University Blvd"),
            NavigationStep::new(Direction::Right, "0.3 mi", "Turn right onto Alafaya Trail"),
            NavigationStep::new(Direction::Left, "1.2 mi", "Turn left onto Colonial Dr"),
            NavigationStep::new(Direction::Right, "0.8 mi", "Turn right onto Destination St"),
            NavigationStep::new(
                Direction::Straight,
                "0.1 mi",
                &format!("Arrive at {}", destination),
            ),
        ])
    }
}
