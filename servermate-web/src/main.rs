mod alerts;
mod analytics;
mod auth;
mod cases;
mod discord;
mod features;
mod groups;
mod guilds;
mod oauth;
mod prelude;
mod status;
mod summaries;

use actix_web::{web, App, HttpServer};
use servermate::{config, init, permissions::PermissionCache};
use tracing_actix_web::TracingLogger;

pub(crate) struct AppState {
    config: config::ServerMateConfig,
    http: awc::Client,
    discord: discord::DiscordClient,
    sql: servermate_sql::SqlPool,
    permissions: PermissionCache,
}

pub fn api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .service(web::scope("/bot").configure(status::scoped_config))
            .service(
                web::scope("/guilds")
                    .configure(guilds::scoped_config)
                    .configure(features::scoped_config)
                    .configure(summaries::scoped_config)
                    .configure(cases::scoped_config)
                    .configure(alerts::scoped_config)
                    .configure(analytics::scoped_config),
            )
            .service(web::scope("/groups").configure(groups::scoped_config)),
    );
    // OAuth is not versioned
    cfg.service(web::scope("/oauth").configure(oauth::scoped_config));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = config::load_config();
    init::init(&config);

    let sql = servermate_sql::init(&config).await;
    let permissions = PermissionCache::new();
    let port = config.web.port;

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(AppState {
                config: config.clone(),
                http: awc::Client::new(),
                discord: discord::DiscordClient::new(config.discord.bot_token.clone()),
                sql: sql.clone(),
                permissions: permissions.clone(),
            }))
            .service(web::scope("/api").configure(api))
    })
    .bind(("127.0.0.1", port))?
    .run()
    .await
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use servermate::config::{DiscordConfig, MetricsConfig, ServerMateConfig, WebConfig};

    /// App state backed by a lazy pool; usable only by routes that bail out
    /// before touching MySQL or Discord.
    pub fn state() -> web::Data<AppState> {
        let config = ServerMateConfig {
            database: "mysql://servermate@localhost/servermate".to_owned(),
            discord: DiscordConfig {
                client_id: "client-id".to_owned(),
                client_secret: "client-secret".to_owned(),
                redirect_uri: "https://servermate.example/callback".to_owned(),
                bot_token: "bot-token".to_owned(),
            },
            web: WebConfig {
                port: 8080,
                cookie_domain: "servermate.example".to_owned(),
            },
            metrics: MetricsConfig { port: None },
            is_prod: false,
        };
        let sql = servermate_sql::mysql::MySqlPoolOptions::new()
            .connect_lazy(&config.database)
            .expect("pool options are static and valid");
        web::Data::new(AppState {
            http: awc::Client::new(),
            discord: discord::DiscordClient::new(config.discord.bot_token.clone()),
            sql,
            permissions: PermissionCache::new(),
            config,
        })
    }
}
