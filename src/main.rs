use clap::{Parser, Subcommand};
use immich_shortcodes::cache::ResponseCache;
use immich_shortcodes::imaging::RustBackend;
use immich_shortcodes::{ImmichConfig, ImmichPlugin, PluginOptions, Shortcodes, config, install};
use std::path::PathBuf;
use std::sync::Arc;

fn version_string() -> &'static str {
    let tagged = env!("IMMICH_SHORTCODES_TAGGED");
    if tagged == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let revision = env!("IMMICH_SHORTCODES_REVISION");
        if revision.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{revision}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "immich-shortcodes")]
#[command(about = "Embed Immich photos and albums in static pages")]
#[command(long_about = "\
Embed Immich photos and albums in static pages

Fetches assets from an Immich server, writes resized copies to the output
directory and prints the HTML that references them.

Template tags (for the render command):

  {% immich_image \"<asset uuid>\" %}   one responsive <img>
  {% immich_album \"<album uuid>\" %}   album title, description and images

Settings (first available wins):
  Server:  --api-url → config file → IMMICH_BASE_URL
  API key: --api-key → config file → IMMICH_API_KEY
  Cache:   config file cacheDuration → IMMICH_CACHE_DURATION → 1d

A .env file in the working directory is loaded before resolving settings.
Set RUST_LOG=debug to see every request.

Run 'immich-shortcodes gen-config' to generate a documented options file.")]
#[command(version = version_string())]
struct Cli {
    /// Options file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Immich server URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Immich API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory for cached API responses
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory resized images are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// URL prefix for resized images in the generated HTML
    #[arg(long, global = true)]
    url_path: Option<String>,

    /// Disable the response cache and always fetch from the server
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the HTML for one asset
    Image { uuid: String },
    /// Print the HTML for an album
    Album { uuid: String },
    /// Check the server and API key
    Whoami,
    /// Expand shortcode tags in a template file
    Render {
        input: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a stock options file with all settings documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_options_toml());
        return Ok(());
    }

    let plugin = build_plugin(&cli)?;

    match &cli.command {
        Command::Image { uuid } => {
            println!("{}", plugin.image(uuid).await?);
        }
        Command::Album { uuid } => {
            println!("{}", plugin.album(uuid).await?);
        }
        Command::Whoami => {
            let user = plugin.probe().await?;
            match user.email {
                Some(email) => println!("{} <{}>", user.name, email),
                None => println!("{}", user.name),
            }
            return Ok(());
        }
        Command::Render { input, output } => {
            let template = tokio::fs::read_to_string(input).await?;
            let mut host = Shortcodes::new();
            install(&mut host, &plugin);
            let rendered = host.render(&template).await?;
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(path, rendered).await?;
                    eprintln!("==> Wrote {}", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        // Printed before resolving settings
        Command::GenConfig => {}
    }

    if plugin.client().cache().is_enabled() {
        eprintln!("Cache: {}", plugin.cache_stats());
    }
    Ok(())
}

/// Merge the options file with command-line flags and build the plugin.
fn build_plugin(cli: &Cli) -> Result<ImmichPlugin, Box<dyn std::error::Error>> {
    let mut options = match &cli.config {
        Some(path) => PluginOptions::load(path)?,
        None => PluginOptions::default(),
    };
    if let Some(url) = &cli.api_url {
        options.api_url = Some(url.clone());
    }
    if let Some(key) = &cli.api_key {
        options.api_key = Some(key.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        options.cache_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.output_dir {
        options.output_dir = Some(dir.clone());
    }
    if let Some(path) = &cli.url_path {
        options.url_path = Some(path.clone());
    }

    let config = ImmichConfig::resolve(options)?;
    let plugin = if cli.no_cache {
        ImmichPlugin::with_parts(config, ResponseCache::disabled(), Arc::new(RustBackend::new()))?
    } else {
        ImmichPlugin::new(config)?
    };
    Ok(plugin)
}
