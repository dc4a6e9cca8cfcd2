use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use tsunagi::*;

// Regular structs, wired by name and by type

struct Config {
    db_host: String,
    timeout: Duration,
}

struct Database {
    url: String,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        format!("[{}] {}", self.url, sql)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Application-wide scope: configuration and a shared connection
    let app = Scope::named("app");
    app.register_value(
        Key::of::<Config>(),
        Config {
            db_host: "localhost".into(),
            timeout: Duration::from_secs(30),
        },
    )?
    .register_resolver(
        Key::of::<Database>(),
        Resolver::new(|args| {
            let config = args.get::<Config>("config")?;
            Ok(Database {
                url: format!("postgres://{}", config.db_host),
            })
        })
        .inject("config", Key::of::<Config>())
        .evaluate_once(),
    )?;
    let _app = app.enter()?;

    // Type-keyed injection
    let timeout = inject_active(|config: Arc<Config>| config.timeout)?;
    println!("timeout: {}s", timeout.as_secs());

    // Per-request scope, composing with the application scope
    let handler = Injector::new(
        "handle",
        [
            Param::named("path"),
            Param::inject("db", Key::of::<Database>()),
            Param::inject("user", "user"),
        ],
        |args: Args| -> Result<String, Error> {
            let db = args.get::<Database>("db")?;
            let user = args.get::<String>("user")?;
            Ok(db.query(&format!("SELECT * FROM {} WHERE owner = '{user}'", args.get::<String>("path")?)))
        },
    )?;

    for user in ["alice", "bob"] {
        let request = dependency_scope()?;
        request.register_value("user", user.to_string())?;
        let answer = handler.call(Args::new().with("path", String::from("documents")))??;
        println!("{answer}");
    }

    // Async resolvers are reached from the async path only
    app.register_async_resolver(
        "session",
        AsyncResolver::new(|args: Args| async move {
            tokio::task::yield_now().await;
            Ok(format!("session on {}", args.get::<Database>("db")?.url))
        })
        .inject("db", Key::of::<Database>()),
    )?;
    match resolve_dependency("session") {
        Err(err @ Error::AsyncDependency { .. }) => println!("sync path: {err}"),
        other => println!("unexpected: {:?}", other.map(|_| ())),
    }

    let session = with_scope_context(resolve_dependency_as_async::<String>("session")).await?;
    println!("async path: {session}");

    Ok(())
}
