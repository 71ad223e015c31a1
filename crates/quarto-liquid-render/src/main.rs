/*
 * main.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Command-line renderer for Liquid templates
 */

use anyhow::{Context, Result};
use clap::Parser;
use quarto_liquid::{Engine, EngineConfig, Rendered, TemplateContext};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quarto-liquid-render")]
#[command(about = "Render a Liquid template, resolving partials from a directory")]
struct Args {
    /// Template file to render
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,

    /// Directory partials are read from (defaults to the template's directory)
    #[arg(long, value_name = "DIR")]
    templates: Option<PathBuf>,

    /// JSON or YAML file with template variables
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Treat every string from the data file as untrusted input
    #[arg(long)]
    taint_data: bool,

    /// Strict parsing, and untrusted output reported as an error
    #[arg(long)]
    strict: bool,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Verbose output (-v for partial loading, -vv for cache hits)"
    )]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let rendered = run(&args)?;
    print!("{}", rendered.output);

    for diagnostic in &rendered.diagnostics {
        eprintln!("{}", diagnostic.to_text());
    }

    if rendered.has_errors() {
        let errors = rendered
            .diagnostics
            .iter()
            .filter(|d| d.kind == quarto_liquid::DiagnosticKind::Error)
            .count();
        eprintln!("\nRendering produced {} error(s)", errors);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "quarto_liquid=warn",
        1 => "quarto_liquid=debug",
        _ => "quarto_liquid=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: &Args) -> Result<Rendered> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {:?}", path))?,
        None => EngineConfig::default(),
    };
    if args.strict {
        config = config.strict();
    }

    config.template_dir = args
        .templates
        .clone()
        .or(config.template_dir)
        .or_else(|| Some(template_parent(&args.template)));
    tracing::debug!(template_dir = ?config.template_dir, "Partial directory");

    let source = fs::read_to_string(&args.template)
        .with_context(|| format!("Failed to read template: {:?}", args.template))?;

    let context = match &args.data {
        Some(path) => {
            let data = load_data(path)?;
            if args.taint_data {
                TemplateContext::from_untrusted_json(data)
            } else {
                TemplateContext::from_json(data)
            }
        }
        None => TemplateContext::new(),
    };

    let engine = Engine::new(config);
    engine
        .render_str(&source, context)
        .with_context(|| format!("Failed to render {:?}", args.template))
}

fn template_parent(template: &Path) -> PathBuf {
    match template.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Read template variables. `.json` files are parsed as JSON, anything else as YAML.
fn load_data(path: &Path) -> Result<serde_json::Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read data file: {:?}", path))?;

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let value: serde_json::Value = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON data: {:?}", path))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML data: {:?}", path))?
    };

    if !value.is_object() {
        anyhow::bail!("Data file must contain a mapping at the top level: {:?}", path);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(template: PathBuf) -> Args {
        Args {
            template,
            templates: None,
            data: None,
            config: None,
            taint_data: false,
            strict: false,
            verbose: 0,
        }
    }

    #[test]
    fn test_renders_with_partials_next_to_template() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.liquid"), "{% render 'card', title: title %}").unwrap();
        fs::write(dir.path().join("_card.liquid"), "<h1>{{ title }}</h1>").unwrap();
        fs::write(dir.path().join("data.yml"), "title: Home\n").unwrap();

        let mut args = args(dir.path().join("page.liquid"));
        args.data = Some(dir.path().join("data.yml"));

        let rendered = run(&args).unwrap();
        assert_eq!(rendered.output, "<h1>Home</h1>");
        assert!(rendered.diagnostics.is_empty());
    }

    #[test]
    fn test_strict_taint_is_an_error_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.liquid"), "[{{ title }}][{{ title | escape }}]").unwrap();
        fs::write(dir.path().join("data.json"), r#"{ "title": "<b>" }"#).unwrap();

        let mut args = args(dir.path().join("page.liquid"));
        args.data = Some(dir.path().join("data.json"));
        args.taint_data = true;
        args.strict = true;

        let rendered = run(&args).unwrap();
        assert_eq!(rendered.output, "[][&lt;b&gt;]");
        assert!(rendered.has_errors());
    }

    #[test]
    fn test_templates_dir_from_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("partials")).unwrap();
        fs::write(dir.path().join("partials").join("_footer.liquid"), "bye").unwrap();
        fs::write(dir.path().join("page.liquid"), "{% include 'footer' %}").unwrap();
        fs::write(dir.path().join("liquid.yml"), "liquid:\n  template-dir: partials\n").unwrap();

        let mut args = args(dir.path().join("page.liquid"));
        args.config = Some(dir.path().join("liquid.yml"));

        assert_eq!(run(&args).unwrap().output, "bye");
    }

    #[test]
    fn test_data_must_be_a_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.yml");
        fs::write(&path, "- a\n- b\n").unwrap();
        assert!(load_data(&path).is_err());
    }

    #[test]
    fn test_template_parent_of_bare_file_name() {
        assert_eq!(template_parent(Path::new("page.liquid")), PathBuf::from("."));
        assert_eq!(template_parent(Path::new("site/page.liquid")), PathBuf::from("site"));
    }
}
