use clap::{Parser, Subcommand};
use reqwest::{multipart, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

const TOKEN_FILE: &str = ".ke_token";

#[derive(Parser)]
#[command(name = "ke-cli")]
#[command(about = "CLI for the website admin API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Contacts {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    GetContact {
        #[arg(short, long)]
        id: u64,
    },
    DeleteContact {
        #[arg(short, long)]
        id: u64,
    },
    Products,
    CreateProduct {
        #[arg(short, long)]
        titolo: String,
        /// Extra fields as a JSON object, e.g. '{"categoria":"Fotovoltaico"}'
        #[arg(short, long, default_value = "{}")]
        json: String,
    },
    UpdateProduct {
        #[arg(short, long)]
        id: u64,
        #[arg(short, long)]
        titolo: String,
        #[arg(short, long, default_value = "{}")]
        json: String,
    },
    DeleteProduct {
        #[arg(short, long)]
        id: u64,
    },
    Incentives,
    CreateIncentive {
        #[arg(short, long)]
        titolo: String,
        #[arg(short, long, default_value = "{}")]
        json: String,
    },
    UpdateIncentive {
        #[arg(short, long)]
        id: u64,
        #[arg(short, long)]
        titolo: String,
        #[arg(short, long, default_value = "{}")]
        json: String,
    },
    DeleteIncentive {
        #[arg(short, long)]
        id: u64,
    },
    Upload {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Downloads the contact CSV (Basic auth, not the token)
    ExportCsv {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long, default_value = "contatti.csv")]
        output: PathBuf,
    },
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authed(req: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    req.header("Authorization", format!("Bearer {}", token.trim()))
}

/// `{"titolo": ...}` merged over the extra fields given with `--json`.
fn content_body(titolo: String, extra: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let mut body: Value = serde_json::from_str(extra)?;
    let Some(fields) = body.as_object_mut() else {
        return Err("--json must be a JSON object".into());
    };
    fields.insert("titolo".into(), json!(titolo));
    Ok(body)
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn print_response(req: RequestBuilder) -> Result<(), Box<dyn std::error::Error>> {
    let res = req.send().await?;
    println!("{} {}", res.status(), res.text().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = format!("{}/api/admin", cli.url.trim_end_matches('/'));

    match cli.command {
        Commands::Login { username, password } => {
            let res = client
                .post(format!("{api}/login"))
                .json(&json!({ "username": username, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {TOKEN_FILE}");
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Logout => {
            let _ = authed(client.post(format!("{api}/logout"))).send().await;
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::Contacts { page, limit } => {
            print_response(
                authed(client.get(format!("{api}/contatti")))
                    .query(&[("page", page), ("limit", limit)]),
            )
            .await?;
        }
        Commands::GetContact { id } => {
            print_response(authed(client.get(format!("{api}/contatti/{id}")))).await?;
        }
        Commands::DeleteContact { id } => {
            print_response(authed(client.delete(format!("{api}/contatti/{id}")))).await?;
        }
        Commands::Products => {
            print_response(authed(client.get(format!("{api}/prodotti")))).await?;
        }
        Commands::CreateProduct { titolo, json } => {
            let body = content_body(titolo, &json)?;
            print_response(authed(client.post(format!("{api}/prodotti"))).json(&body)).await?;
        }
        Commands::UpdateProduct { id, titolo, json } => {
            let body = content_body(titolo, &json)?;
            print_response(authed(client.put(format!("{api}/prodotti/{id}"))).json(&body)).await?;
        }
        Commands::DeleteProduct { id } => {
            print_response(authed(client.delete(format!("{api}/prodotti/{id}")))).await?;
        }
        Commands::Incentives => {
            print_response(authed(client.get(format!("{api}/incentivi")))).await?;
        }
        Commands::CreateIncentive { titolo, json } => {
            let body = content_body(titolo, &json)?;
            print_response(authed(client.post(format!("{api}/incentivi"))).json(&body)).await?;
        }
        Commands::UpdateIncentive { id, titolo, json } => {
            let body = content_body(titolo, &json)?;
            print_response(authed(client.put(format!("{api}/incentivi/{id}"))).json(&body)).await?;
        }
        Commands::DeleteIncentive { id } => {
            print_response(authed(client.delete(format!("{api}/incentivi/{id}")))).await?;
        }
        Commands::Upload { file } => {
            let bytes = fs::read(&file)?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let part = multipart::Part::bytes(bytes)
                .file_name(name)
                .mime_str(guess_mime(&file))?;
            let form = multipart::Form::new().part("file", part);
            print_response(authed(client.post(format!("{api}/upload"))).multipart(form)).await?;
        }
        Commands::ExportCsv {
            username,
            password,
            output,
        } => {
            let res = client
                .get(format!("{}/admin/export.csv", cli.url.trim_end_matches('/')))
                .basic_auth(username, Some(password))
                .send()
                .await?;
            if res.status().is_success() {
                fs::write(&output, res.bytes().await?)?;
                println!("Saved {}", output.display());
            } else {
                println!("Export failed: {} {}", res.status(), res.text().await?);
            }
        }
    }

    Ok(())
}
