//! Seed script for the content store
//!
//! Inserts a few sample products and incentives so the public pages have
//! something to render on a fresh checkout. Collections that already hold
//! records are left alone.
//! Run: cargo run --bin seed_content   (honors DATA_DIR / .env)

use ke_backend::config::Config;
use ke_backend::models::{IncentiveInput, ProductInput};
use ke_backend::storage::Stores;
use ke_backend::validation::BulletsInput;

fn product(titolo: &str, categoria: &str, descrizione: &str, bullets: &str) -> ProductInput {
    ProductInput {
        titolo: Some(titolo.into()),
        categoria: Some(categoria.into()),
        descrizione: Some(descrizione.into()),
        bullets: Some(BulletsInput::Text(bullets.into())),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let stores = Stores::open(&config.data_dir).await?;

    if stores.products.list().await?.is_empty() {
        let samples = [
            product(
                "Impianto fotovoltaico residenziale",
                "Fotovoltaico",
                "Impianti chiavi in mano da 3 a 20 kWp.",
                "Sopralluogo gratuito\nPratiche incluse\nMonitoraggio da app",
            ),
            product(
                "Sistema di accumulo",
                "Storage",
                "Batterie al litio per l'autoconsumo serale.",
                "Da 5 a 15 kWh\nGaranzia 10 anni",
            ),
            product(
                "Pompa di calore",
                "Efficienza",
                "Riscaldamento e raffrescamento ad alta efficienza.",
                "Classe A+++\nIntegrazione con il fotovoltaico",
            ),
        ];
        for input in samples {
            let stored = stores.products.insert(input.into_product()?).await?;
            println!("✅ Product #{} {}", stored.id, stored.titolo);
        }
    } else {
        println!("Products already present, skipping");
    }

    if stores.incentives.list().await?.is_empty() {
        let input = IncentiveInput {
            titolo: Some("Detrazione 50% ristrutturazioni".into()),
            stato: Some("Attivo".into()),
            scadenza: Some("31/12/2026".into()),
            descrizione: Some("Detrazione IRPEF in 10 anni per impianti su abitazioni.".into()),
            bullets: Some(BulletsInput::List(vec![
                "Per persone fisiche".into(),
                "Cumulabile con lo scambio sul posto".into(),
            ])),
            ..Default::default()
        };
        let stored = stores.incentives.insert(input.into_incentive()?).await?;
        println!("✅ Incentive #{} {}", stored.id, stored.titolo);
    } else {
        println!("Incentives already present, skipping");
    }

    println!("✅ Content store ready in {}", config.data_dir.display());
    Ok(())
}
