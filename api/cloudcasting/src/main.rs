use cloudcasting::{format_time_step, variables, CloudcastingApi, MAX_TIME_STEPS};
use std::env;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <command> [args...]", args[0]);
        eprintln!("Commands:");
        eprintln!("  variables - List available forecast variables");
        eprintln!("  steps - List forecast time steps");
        eprintln!("  fetch <variable> <step> [output.tif] - Fetch one raster layer");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  {} variables", args[0]);
        eprintln!("  {} fetch IR_016 3", args[0]);
        std::process::exit(1);
    }

    let command = &args[1];

    match command.as_str() {
        "variables" => {
            if args.get(2).map(String::as_str) == Some("--json") {
                println!("{}", serde_json::to_string_pretty(variables())?);
            } else {
                println!("Available forecast variables:");
                for variable in variables() {
                    println!(
                        "  {} - {} ({})",
                        variable.value, variable.label, variable.description
                    );
                }
            }
        }

        "steps" => {
            println!("Forecast horizon ({} steps):", MAX_TIME_STEPS);
            for step in 0..MAX_TIME_STEPS {
                println!("  {} -> {}", step, format_time_step(step));
            }
        }

        "fetch" => {
            if args.len() < 4 {
                eprintln!("Not enough arguments for fetch command");
                std::process::exit(1);
            }

            let variable = &args[2];
            let step: u32 = args[3].parse()?;

            let api = CloudcastingApi::new()?;

            println!("Fetching layer for variable: {}", variable);
            println!("Step: {} ({})", step, format_time_step(step));

            let data = api.fetch_layer(variable, step).await?;

            let default_name = format!("{}_{}.tif", variable, step);
            let filename = args.get(4).unwrap_or(&default_name);
            std::fs::write(filename, &data)?;
            println!("Layer saved to: {} ({} bytes)", filename, data.len());
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }

    Ok(())
}
