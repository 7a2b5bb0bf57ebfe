use stress_test::{stress_test_scaling, stress_test_views};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), tally_sync::TallyError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATED VIEW COUNTER STRESS TESTS             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Pull-only replication
    let stats = stress_test_views(4, 200, 10, 200, false).await?;
    stats.print();

    // Push after every view, plus pulls
    let stats = stress_test_views(4, 200, 10, 200, true).await?;
    stats.print();

    // More replicas, more items
    let stats = stress_test_views(10, 500, 50, 1000, false).await?;
    stats.print();

    stress_test_scaling(12, 4).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
