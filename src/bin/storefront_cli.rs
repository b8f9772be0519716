use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use storefront_api::{
    config::{self, AppConfig},
    db,
    entities::commerce::{DiscountType, ProductStatus},
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        commerce::{
            category_service::CreateCategoryInput, product_catalog_service::CreateProductInput,
        },
        coupons::CreateCouponInput,
        maintenance::MaintenanceReport,
        shipping::CreateRateInput,
    },
};
use tokio::sync::mpsc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(config::load_config().context("failed to load application config")?);
    config::init_tracing(&config.log_level, config.log_json);

    match cli.command {
        Commands::Migrate => {
            storefront_api::migrator::run_migration(&config.database_url).await?;
            println!("Migrations applied");
        }
        Commands::Cleanup => {
            let services = connect(config.clone()).await?;
            let report = services.maintenance_worker(&config).run_once().await;
            render_report(&report, cli.json)?;
        }
        Commands::Seed => {
            let services = connect(config.clone()).await?;
            let summary = seed(&services).await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Seeded {} categories, {} products, {} shipping rates and {} coupons",
                    summary.categories, summary.products, summary.shipping_rates, summary.coupons
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "storefront", about = "Storefront maintenance commands", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Release expired reservations, abandon idle carts, expire checkout
    /// sessions and cancel unpaid orders
    Cleanup,
    /// Insert a small demo catalog
    Seed,
}

async fn connect(config: Arc<AppConfig>) -> Result<AppServices> {
    let pool = db::establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    let db = Arc::new(pool);

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(target: "storefront_cli", event = ?event, "received async event");
        }
    });

    AppServices::new(db, event_sender, config).context("failed to build services")
}

#[derive(Debug, Default, Serialize)]
struct SeedSummary {
    categories: usize,
    products: usize,
    shipping_rates: usize,
    coupons: usize,
}

async fn seed(services: &AppServices) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    let apparel = services
        .categories
        .create_category(category("Apparel", None))
        .await?;
    let shirts = services
        .categories
        .create_category(category("Shirts", Some(apparel.id)))
        .await?;
    let accessories = services
        .categories
        .create_category(category("Accessories", None))
        .await?;
    summary.categories = 3;

    let catalog = [
        ("Classic Tee", "TEE-001", Decimal::new(1999, 2), 120, shirts.id),
        ("Oxford Shirt", "OXF-001", Decimal::new(5900, 2), 40, shirts.id),
        ("Canvas Tote", "TOTE-001", Decimal::new(2450, 2), 75, accessories.id),
        ("Leather Belt", "BELT-001", Decimal::new(3500, 2), 0, accessories.id),
    ];
    for (name, sku, price, stock, category_id) in catalog {
        services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                slug: None,
                sku: sku.to_string(),
                description: Some(format!("{} from the demo catalog", name)),
                price,
                compare_at_price: None,
                stock_quantity: stock,
                category_id: Some(category_id),
                status: Some(ProductStatus::Active),
                seo_title: None,
                seo_description: None,
                seo_keywords: None,
            })
            .await?;
        summary.products += 1;
    }

    let rates = [
        ("standard", "Standard", Decimal::new(499, 2), Decimal::ZERO, Some(Decimal::from(50)), 3, 5),
        ("express", "Express", Decimal::new(1299, 2), Decimal::ONE, None, 1, 2),
    ];
    for (code, name, base, per_item, threshold, min_days, max_days) in rates {
        services
            .shipping
            .create_rate(CreateRateInput {
                method_code: code.to_string(),
                name: name.to_string(),
                base_cost: base,
                per_item_cost: per_item,
                free_shipping_threshold: threshold,
                estimated_days_min: min_days,
                estimated_days_max: max_days,
                is_active: true,
            })
            .await?;
        summary.shipping_rates += 1;
    }

    services
        .coupons
        .create_coupon(CreateCouponInput {
            code: "WELCOME10".to_string(),
            description: Some("10% off your first order".to_string()),
            discount_type: DiscountType::Percentage,
            value: Decimal::from(10),
            min_order_amount: Some(Decimal::from(25)),
            max_discount_amount: Some(Decimal::from(20)),
            usage_limit: None,
            per_user_limit: Some(1),
            applicable_category_ids: Vec::new(),
            applicable_product_ids: Vec::new(),
            allowed_user_ids: Vec::new(),
            starts_at: None,
            ends_at: None,
            is_active: true,
        })
        .await?;
    summary.coupons = 1;

    Ok(summary)
}

fn category(name: &str, parent_id: Option<uuid::Uuid>) -> CreateCategoryInput {
    CreateCategoryInput {
        name: name.to_string(),
        slug: None,
        description: None,
        parent_id,
        sort_order: None,
        is_active: Some(true),
        seo_title: None,
        seo_description: None,
    }
}

fn render_report(report: &MaintenanceReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!("- reservations released: {}", report.reservations_released);
    println!("- carts abandoned:       {}", report.carts_abandoned);
    println!("- sessions expired:      {}", report.sessions_expired);
    println!("- orders cancelled:      {}", report.orders_cancelled);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
