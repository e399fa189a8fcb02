use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{
    clean_opt, clean_str, is_email, lenient_string, BulletsInput, ValidationError,
};

/// Anything stored in a [`crate::storage::RecordStore`]: identified by a
/// monotonically allocated integer and stamped with its creation time.
pub trait Record: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    fn id(&self) -> u64;

    /// Called by the store right before the record is inserted.
    fn stamp(&mut self, id: u64, created_at: String);
}

/// Current time the way records store it (`2025-01-31T09:15:00.123Z`).
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// --- Contacts ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: u64,
    pub created_at: String,
    pub nome: String,
    pub azienda: Option<String>,
    pub telefono: String,
    pub email: String,
    pub indirizzo: Option<String>,
    pub note: Option<String>,
}

impl Record for Contact {
    fn id(&self) -> u64 {
        self.id
    }

    fn stamp(&mut self, id: u64, created_at: String) {
        self.id = id;
        self.created_at = created_at;
    }
}

/// Contact form body as posted by the site.
#[derive(Deserialize, Debug, Default)]
pub struct ContactInput {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nome: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub azienda: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub telefono: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub indirizzo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: Option<String>,
}

impl ContactInput {
    /// Sanitizes the form and checks required fields in display order.
    /// The returned record still needs an id from the store.
    pub fn validate(&self) -> Result<Contact, ValidationError> {
        let nome = clean_str(self.nome.as_deref(), 160);
        let telefono = clean_str(self.telefono.as_deref(), 60);
        let email = clean_str(self.email.as_deref(), 160);

        if nome.is_empty() {
            return Err(ValidationError("Inserisci nome e cognome.".into()));
        }
        if telefono.is_empty() {
            return Err(ValidationError("Inserisci un numero di telefono.".into()));
        }
        if email.is_empty() || !is_email(&email) {
            return Err(ValidationError("Inserisci un'email valida.".into()));
        }

        Ok(Contact {
            id: 0,
            created_at: String::new(),
            nome,
            azienda: clean_opt(self.azienda.as_deref(), 160),
            telefono,
            email,
            indirizzo: clean_opt(self.indirizzo.as_deref(), 220),
            note: clean_opt(self.note.as_deref(), 5000),
        })
    }
}

// --- Products ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Product {
    pub id: u64,
    pub created_at: String,
    pub titolo: String,
    pub descrizione: Option<String>,
    pub categoria: Option<String>,
    pub immagine: Option<String>,
    pub pdf: Option<String>,
    pub link: Option<String>,
    #[serde(default)]
    pub bullets: Vec<String>,
}

impl Record for Product {
    fn id(&self) -> u64 {
        self.id
    }

    fn stamp(&mut self, id: u64, created_at: String) {
        self.id = id;
        self.created_at = created_at;
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ProductInput {
    #[serde(default, deserialize_with = "lenient_string")]
    pub titolo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descrizione: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub categoria: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub immagine: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pdf: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub link: Option<String>,
    #[serde(default)]
    pub bullets: Option<BulletsInput>,
}

fn required_title(titolo: Option<&str>) -> Result<String, ValidationError> {
    let titolo = clean_str(titolo, 140);
    if titolo.is_empty() {
        return Err(ValidationError("Titolo obbligatorio".into()));
    }
    Ok(titolo)
}

/// Overwrites `slot` only when the field was sent.
fn merge_opt(slot: &mut Option<String>, value: &Option<String>, max: usize) {
    if value.is_some() {
        *slot = clean_opt(value.as_deref(), max);
    }
}

fn clean_bullets(bullets: &Option<BulletsInput>) -> Vec<String> {
    bullets.as_ref().map(BulletsInput::clean).unwrap_or_default()
}

impl ProductInput {
    pub fn into_product(self) -> Result<Product, ValidationError> {
        Ok(Product {
            id: 0,
            created_at: String::new(),
            titolo: required_title(self.titolo.as_deref())?,
            descrizione: clean_opt(self.descrizione.as_deref(), 2000),
            categoria: clean_opt(self.categoria.as_deref(), 80),
            immagine: clean_opt(self.immagine.as_deref(), 600),
            pdf: clean_opt(self.pdf.as_deref(), 600),
            link: clean_opt(self.link.as_deref(), 600),
            bullets: clean_bullets(&self.bullets),
        })
    }

    /// Validates the patch up front so a bad title never reaches the store.
    pub fn check(&self) -> Result<(), ValidationError> {
        required_title(self.titolo.as_deref()).map(|_| ())
    }

    /// Partial merge: fields absent from the payload keep their value.
    pub fn merge_into(&self, product: &mut Product) {
        if let Ok(titolo) = required_title(self.titolo.as_deref()) {
            product.titolo = titolo;
        }
        merge_opt(&mut product.descrizione, &self.descrizione, 2000);
        merge_opt(&mut product.categoria, &self.categoria, 80);
        merge_opt(&mut product.immagine, &self.immagine, 600);
        merge_opt(&mut product.pdf, &self.pdf, 600);
        merge_opt(&mut product.link, &self.link, 600);
        if let Some(bullets) = &self.bullets {
            product.bullets = bullets.clean();
        }
    }
}

// --- Incentives ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Incentive {
    pub id: u64,
    pub created_at: String,
    pub titolo: String,
    pub descrizione: Option<String>,
    pub stato: Option<String>,
    pub scadenza: Option<String>,
    pub immagine: Option<String>,
    pub link1: Option<String>,
    #[serde(rename = "link1Label")]
    pub link1_label: Option<String>,
    pub link2: Option<String>,
    #[serde(rename = "link2Label")]
    pub link2_label: Option<String>,
    #[serde(default)]
    pub bullets: Vec<String>,
}

impl Record for Incentive {
    fn id(&self) -> u64 {
        self.id
    }

    fn stamp(&mut self, id: u64, created_at: String) {
        self.id = id;
        self.created_at = created_at;
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct IncentiveInput {
    #[serde(default, deserialize_with = "lenient_string")]
    pub titolo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descrizione: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stato: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub scadenza: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub immagine: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub link1: Option<String>,
    #[serde(default, rename = "link1Label", deserialize_with = "lenient_string")]
    pub link1_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub link2: Option<String>,
    #[serde(default, rename = "link2Label", deserialize_with = "lenient_string")]
    pub link2_label: Option<String>,
    #[serde(default)]
    pub bullets: Option<BulletsInput>,
}

impl IncentiveInput {
    pub fn into_incentive(self) -> Result<Incentive, ValidationError> {
        Ok(Incentive {
            id: 0,
            created_at: String::new(),
            titolo: required_title(self.titolo.as_deref())?,
            descrizione: clean_opt(self.descrizione.as_deref(), 2000),
            stato: clean_opt(self.stato.as_deref(), 60),
            scadenza: clean_opt(self.scadenza.as_deref(), 60),
            immagine: clean_opt(self.immagine.as_deref(), 600),
            link1: clean_opt(self.link1.as_deref(), 600),
            link1_label: clean_opt(self.link1_label.as_deref(), 120),
            link2: clean_opt(self.link2.as_deref(), 600),
            link2_label: clean_opt(self.link2_label.as_deref(), 120),
            bullets: clean_bullets(&self.bullets),
        })
    }

    pub fn check(&self) -> Result<(), ValidationError> {
        required_title(self.titolo.as_deref()).map(|_| ())
    }

    pub fn merge_into(&self, incentive: &mut Incentive) {
        if let Ok(titolo) = required_title(self.titolo.as_deref()) {
            incentive.titolo = titolo;
        }
        merge_opt(&mut incentive.descrizione, &self.descrizione, 2000);
        merge_opt(&mut incentive.stato, &self.stato, 60);
        merge_opt(&mut incentive.scadenza, &self.scadenza, 60);
        merge_opt(&mut incentive.immagine, &self.immagine, 600);
        merge_opt(&mut incentive.link1, &self.link1, 600);
        merge_opt(&mut incentive.link1_label, &self.link1_label, 120);
        merge_opt(&mut incentive.link2, &self.link2, 600);
        merge_opt(&mut incentive.link2_label, &self.link2_label, 120);
        if let Some(bullets) = &self.bullets {
            incentive.bullets = bullets.clean();
        }
    }
}

/// Claims carried inside an admin token.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenClaims {
    pub u: String,
    /// Expiry, epoch milliseconds.
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Identity attached to a request once its bearer token verified.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user: String,
}
