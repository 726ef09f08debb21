mod api;
mod app_state;
mod config;
mod engine;
mod error;
mod features;
mod types;

use log::{error, info};
use rocket::fairing::{self, AdHoc};
use rocket::{launch, Build, Rocket};

use app_state::AppState;
use config::ServerConfig;

/// Loads the model before the server starts listening. Any failure here
/// aborts launch: there is nothing to serve without a model.
async fn load_model(rocket: Rocket<Build>) -> fairing::Result {
    let cfg: ServerConfig = match rocket.figment().extract() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("invalid configuration: {e}");
            return Err(rocket);
        }
    };

    match AppState::from_config(&cfg) {
        Ok(state) => {
            info!(
                "serving with up to {} concurrent inferences, {}ms timeout",
                state.max_concurrent_infer, cfg.infer_timeout_ms
            );
            Ok(rocket.manage(state))
        }
        Err(e) => {
            error!("failed to load model `{}`: {e:#}", cfg.model_path.display());
            Err(rocket)
        }
    }
}

#[launch]
fn rocket() -> _ {
    rocket::custom(config::figment())
        .attach(AdHoc::try_on_ignite("Model Loader", load_model))
        .mount("/", api::routes())
}
