//! Standalone preflight validator for the deployment configuration.
//!
//! Checks the pieces the bot container needs before it can start: the
//! compose file, the `.env` schema and the SSH key. Purely filesystem
//! checks; the Docker daemon is never contacted, so this is safe to run
//! anywhere (CI included).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use schedule_bot_ops::config::{
    DeploySettings, EnvFile, REQUIRED_KEYS, SSH_DIR_MODE, SSH_KEY_MODE,
};

/// Deployment configuration validator.
#[derive(Parser, Debug)]
#[command(name = "validate_deploy")]
#[command(about = "Validates the schedule bot deployment configuration")]
#[command(version)]
struct Args {
    /// Project directory with the compose file, data and backups.
    #[arg(short, long, default_value = ".")]
    project_dir: PathBuf,

    /// Generate an example .env file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show each check as it runs.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Handle example generation
    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    let settings = DeploySettings::from_env_with_defaults(args.project_dir);
    validate_deployment(&settings, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    match std::fs::write(output_path, EnvFile::example()) {
        Ok(()) => {
            println!("✓ Example env file written to: {output_path}");
            println!("\nFill in the values, save it as .env and run: botops start");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_deployment(settings: &DeploySettings, verbose: bool) -> ExitCode {
    println!("Validating deployment in: {}\n", settings.project_dir.display());

    let mut errors = 0;
    let mut warnings = 0;

    // Compose file
    let compose_path = settings.compose_path();
    if compose_path.is_file() {
        if verbose {
            println!("✓ Compose file: {}", compose_path.display());
        }
    } else {
        errors += 1;
        println!(
            "✗ Compose file missing: {} (run 'botops generate-config')",
            compose_path.display()
        );
    }

    // Env file
    match EnvFile::load(settings.env_path()) {
        Ok(env) => {
            for (key, result) in env.validate_all() {
                match result {
                    Ok(()) => {
                        if verbose {
                            println!("✓ {key}");
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        println!("✗ {e}");
                    }
                }
            }

            let missing = env.missing_optional();
            if !missing.is_empty() {
                warnings += 1;
                if verbose {
                    println!("⚠ Optional keys not set: {}", missing.join(", "));
                }
            }
        }
        Err(e) => {
            errors += 1;
            println!("✗ {e}");
        }
    }

    // SSH key
    match check_ssh_key(settings) {
        SshCheck::Ok => {
            if verbose {
                println!("✓ SSH key: {}", settings.ssh_key_path().display());
            }
        }
        SshCheck::Missing => {
            warnings += 1;
            println!(
                "⚠ SSH key missing: {} (hosting sync will be disabled)",
                settings.ssh_key_path().display()
            );
        }
        SshCheck::BadMode(mode) => {
            errors += 1;
            println!(
                "✗ SSH key has mode {mode:o}, expected {SSH_KEY_MODE:o} \
                 (run 'botops fix-permissions')"
            );
        }
        SshCheck::BadDirMode(mode) => {
            errors += 1;
            println!(
                "✗ SSH directory has mode {mode:o}, expected {SSH_DIR_MODE:o} \
                 (run 'botops fix-permissions')"
            );
        }
    }

    // Data directory
    if settings.data_path().is_dir() {
        if verbose {
            println!("✓ Data directory: {}", settings.data_path().display());
        }
    } else {
        warnings += 1;
        println!(
            "⚠ Data directory missing: {} (created on first start)",
            settings.data_path().display()
        );
    }

    println!();

    // Summary
    if errors == 0 {
        println!("✓ Deployment configuration is valid!");
        if warnings > 0 {
            println!("  ({warnings} warning(s))");
        }
        println!("\nRequired env keys: {}", REQUIRED_KEYS.join(", "));
        ExitCode::SUCCESS
    } else {
        println!("✗ Validation failed: {errors} error(s), {warnings} warning(s)");
        ExitCode::FAILURE
    }
}

enum SshCheck {
    Ok,
    Missing,
    BadMode(u32),
    BadDirMode(u32),
}

fn check_ssh_key(settings: &DeploySettings) -> SshCheck {
    let key_path = settings.ssh_key_path();
    if !key_path.is_file() {
        return SshCheck::Missing;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = std::fs::metadata(&key_path) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode != SSH_KEY_MODE {
                return SshCheck::BadMode(mode);
            }
        }

        if let Ok(metadata) = std::fs::metadata(settings.ssh_path()) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode != SSH_DIR_MODE {
                return SshCheck::BadDirMode(mode);
            }
        }
    }

    SshCheck::Ok
}
