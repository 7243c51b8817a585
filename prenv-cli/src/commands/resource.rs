//! `prenv resource add|list|show|remove`

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use prenv_core::{
    resources, ControllerSpec, EnvCreationHelmRepo, GithubPrRepository, ResourceName, SecretRef,
};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum ResourceCommand {
    /// Declare a new resource. Existing definitions are left untouched.
    Add(AddArgs),

    /// List declared resources.
    List,

    /// Print one resource definition as YAML.
    Show { name: String },

    /// Delete a resource definition. Deployed environments are not touched.
    Remove { name: String },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Resource name; also the file name under ~/.prenv/resources/.
    pub name: String,

    /// Repository owner (user or organization).
    #[arg(long)]
    pub user: String,

    /// Repository name.
    #[arg(long)]
    pub repo: String,

    /// Secret holding the API token, as `<namespace>/<name>`.
    #[arg(long, value_name = "NAMESPACE/NAME")]
    pub token_secret: String,

    /// Key inside the token secret.
    #[arg(long, default_value = "token")]
    pub token_key: String,

    /// Flux `GitRepository` the chart is pulled from.
    #[arg(long)]
    pub flux_source: String,

    /// Chart path inside the source repository.
    #[arg(long)]
    pub chart_path: String,

    #[arg(long, default_value = "0.1.0")]
    pub chart_version: String,

    /// Namespace the per-PR releases are written to.
    #[arg(long, default_value = "pr-helm-releases")]
    pub namespace: String,

    /// Seconds between ticks (floored at 60).
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Health URL template; `<<PR_NUMBER>>` and `<<PR_HEAD_SHA>>` are substituted.
    #[arg(long)]
    pub health_url: Option<String>,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "namespace")]
    namespace: String,
    #[tabled(rename = "interval")]
    interval: String,
    #[tabled(rename = "health check")]
    health_check: String,
}

pub fn run(cmd: ResourceCommand) -> Result<()> {
    match cmd {
        ResourceCommand::Add(args) => add(args),
        ResourceCommand::List => list(),
        ResourceCommand::Show { name } => show(&name),
        ResourceCommand::Remove { name } => remove(&name),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let home = home_dir()?;
    let (secret_namespace, secret_name) = parse_secret(&args.token_secret)?;
    let spec = ControllerSpec {
        github_pr_repository: GithubPrRepository {
            user: args.user,
            repo: args.repo,
            token_secret_ref: SecretRef {
                name: secret_name,
                namespace: secret_namespace,
                key: args.token_key,
            },
        },
        env_creation_helm_repo: EnvCreationHelmRepo {
            flux_source_repo_name: args.flux_source,
            helm_chart_path: args.chart_path,
            chart_version: args.chart_version,
            destination_namespace: args.namespace,
        },
        interval_secs: args.interval,
        env_health_check_url_template: args.health_url,
    };

    let name = ResourceName::from(args.name.as_str());
    let resource = resources::add_resource_at(&home, name, spec)
        .with_context(|| format!("failed to add resource '{}'", args.name))?;
    println!("✓ Declared resource '{}'", resource.name);
    println!("  Saved to: ~/.prenv/resources/{}.yaml", resource.name);
    Ok(())
}

fn list() -> Result<()> {
    let home = home_dir()?;
    let declared = resources::list_resources_lenient_at(&home)
        .context("failed to read resource definitions")?;

    if declared.is_empty() {
        println!("No resources declared.");
        println!("Run: prenv resource add <name> ...");
        return Ok(());
    }

    let mut rows = Vec::new();
    for (path, parsed) in declared {
        match parsed {
            Ok(resource) => rows.push(ResourceRow {
                name: resource.name.0,
                repository: resource.spec.github_pr_repository.repo_ref().to_string(),
                namespace: resource.spec.env_creation_helm_repo.destination_namespace,
                interval: format!("{}s", resource.spec.interval_secs),
                health_check: resource
                    .spec
                    .env_health_check_url_template
                    .unwrap_or_else(|| "-".to_string()),
            }),
            Err(err) => eprintln!("skipping {}: {err}", path.display()),
        }
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn show(name: &str) -> Result<()> {
    let home = home_dir()?;
    let resource = resources::load_resource_at(&home, &ResourceName::from(name))
        .with_context(|| format!("failed to load resource '{name}'"))?;
    let yaml = serde_yaml::to_string(&resource).context("failed to encode resource")?;
    print!("{yaml}");
    Ok(())
}

fn remove(name: &str) -> Result<()> {
    let home = home_dir()?;
    let removed = resources::remove_resource_at(&home, &ResourceName::from(name))
        .with_context(|| format!("failed to remove resource '{name}'"))?;
    if removed {
        println!("✓ Removed resource '{name}'");
    } else {
        println!("resource '{name}' was not declared");
    }
    Ok(())
}

fn parse_secret(value: &str) -> Result<(String, String)> {
    match value.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(anyhow!(
            "--token-secret must look like <namespace>/<name>, got '{value}'"
        )),
    }
}
