use std::process;

use tracing::{error, info};
use trellis_client::{PoolConfig, Registry};

/// Connects to every configured pool and reports what each cluster says
/// about itself. Exits non-zero if any pool cannot be reached.
fn main() {
    tracing_subscriber::fmt::init();

    let config = match PoolConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(var = PoolConfig::ENV_VAR, error = %e, "failed to load pool config");
            process::exit(2);
        }
    };
    let registry = match Registry::init(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "invalid pool config");
            process::exit(2);
        }
    };

    let mut failed = 0;
    for pool in registry.pool_names() {
        if let Err(e) = probe(&registry, &pool) {
            error!(%pool, error = %e, "probe failed");
            failed += 1;
        }
    }
    registry.shutdown();

    if failed > 0 {
        process::exit(1);
    }
}

fn probe(registry: &Registry, pool: &str) -> Result<(), trellis_client::ClientError> {
    let client = registry.resolve(pool)?;
    let cluster = client.get_string_property("cluster name")?;
    let version = client.get_string_property("version")?;
    let keyspace = client.keyspace();
    let families = client.describe_keyspace(&keyspace)?;
    info!(
        %pool,
        %cluster,
        %version,
        %keyspace,
        servers = client.servers().len(),
        column_families = families.len(),
        "pool ok"
    );
    for (name, settings) in &families {
        let kind = settings.get("Type").map_or("?", String::as_str);
        info!(%pool, column_family = %name, kind, "column family");
    }
    Ok(())
}
