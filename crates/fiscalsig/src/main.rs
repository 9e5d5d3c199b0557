#![forbid(unsafe_code)]

//! fiscalsig CLI: sign, verify and canonicalize fiscal XML documents.

use clap::{Parser, Subcommand};
use fiscalsig::c14n::{C14nConfig, Canonicalizer, W3cCanonicalizer};
use fiscalsig::core::{ns, Error, HashAlgorithm};
use fiscalsig::keys::loader::{load_certificate_bundle_pem, load_rsa_private_pem};
use fiscalsig::keys::{
    taxpayer_id, CertificateCache, CertificateInfo, CertificateProvider, SoftwareCertificate,
    TrustValidator,
};
use fiscalsig::{FiscalSigConfig, SignatureBuilder, SignatureValidator};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "fiscalsig",
    about = "XML signatures for Brazilian fiscal documents (NFe, CTe, MDFe)",
    version
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign one or more documents with an A1 certificate
    Sign {
        /// Input XML files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Private key (PEM, PKCS#8 or PKCS#1)
        #[arg(short, long)]
        key: PathBuf,

        /// Certificate (PEM); further certificates in the file form the chain
        #[arg(long)]
        cert: PathBuf,

        /// Id of the element to sign (default: first element carrying an id)
        #[arg(long)]
        id: Option<String>,

        /// Use SHA-256 / rsa-sha256 instead of the configured digest
        #[arg(long)]
        sha256: bool,

        /// Output file, single input only (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for signed files when signing several inputs
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
    },

    /// Validate a signed document
    Verify {
        /// Signed XML file
        file: PathBuf,

        /// Verify against this certificate (PEM) instead of the embedded one
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Treat an untrusted chain as an error
        #[arg(long)]
        strict: bool,

        /// Pin a trusted root certificate (PEM)
        #[arg(long = "trust-root")]
        trust_root: Vec<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical form of a document or element
    C14n {
        /// Input XML file
        file: PathBuf,

        /// Canonicalize only the element with this id
        #[arg(long)]
        id: Option<String>,

        /// Exclusive canonicalization
        #[arg(long)]
        exclusive: bool,

        /// Keep comments
        #[arg(long = "with-comments")]
        with_comments: bool,

        /// InclusiveNamespaces prefix list (exclusive only)
        #[arg(long = "prefix")]
        prefixes: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show supported algorithms, or inspect a certificate
    Info {
        /// Certificate (PEM) to inspect
        #[arg(long)]
        cert: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Sign {
            files,
            key,
            cert,
            id,
            sha256,
            output,
            output_dir,
        } => cmd_sign(&config, files, &key, &cert, id, sha256, output, output_dir),

        Commands::Verify {
            file,
            cert,
            strict,
            trust_root,
            json,
        } => cmd_verify(config, &file, cert, strict, trust_root, json),

        Commands::C14n {
            file,
            id,
            exclusive,
            with_comments,
            prefixes,
            output,
        } => cmd_c14n(&config, &file, id, exclusive, with_comments, prefixes, output),

        Commands::Info { cert } => cmd_info(&config, cert),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<FiscalSigConfig, Error> {
    match path {
        Some(path) => FiscalSigConfig::load(path),
        None => Ok(FiscalSigConfig::default()),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_sign(
    config: &FiscalSigConfig,
    files: Vec<PathBuf>,
    key_path: &Path,
    cert_path: &Path,
    id: Option<String>,
    sha256: bool,
    output: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<(), Error> {
    if files.len() > 1 && output.is_some() {
        return Err(Error::Config("--output takes a single input; use --output-dir".into()));
    }

    let mut signing = config.signing.clone();
    if sha256 {
        signing.digest_algorithm = HashAlgorithm::Sha256;
        signing.signature_algorithm = None;
    }
    let builder = SignatureBuilder::new(signing);

    let cache = CertificateCache::new(config.cache.capacity, config.cache.ttl())
        .on_evict(|key| log::debug!("released certificate {key}"));
    let cache_key = format!("{}|{}", key_path.display(), cert_path.display());

    for file in &files {
        let provider = cache.get_or_load(&cache_key, || load_provider(key_path, cert_path))?;
        let xml = read_file(file)?;
        let target = match &id {
            Some(id) => id.clone(),
            None => first_signable_id(&xml, &config.signing.id_attributes)?,
        };
        log::info!("signing {} (#{target})", file.display());
        let signed = builder.sign(&xml, &target, provider.as_ref())?;

        let destination = match (&output, &output_dir) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(dir)) => Some(dir.join(file.file_name().unwrap_or(file.as_os_str()))),
            (None, None) => None,
        };
        write_output(destination, signed.as_bytes())?;
    }
    Ok(())
}

fn load_provider(key_path: &Path, cert_path: &Path) -> Result<Box<dyn CertificateProvider>, Error> {
    let key = load_rsa_private_pem(&read_bytes(key_path)?)?;
    let mut certificates = load_certificate_bundle_pem(&read_bytes(cert_path)?)?.into_iter();
    let leaf = certificates
        .next()
        .ok_or_else(|| Error::Certificate(format!("{}: no certificate", cert_path.display())))?;
    let provider = SoftwareCertificate::new(key, leaf)?.with_chain(certificates.collect());
    Ok(Box::new(provider))
}

/// The first element (below the document element) carrying an id attribute.
fn first_signable_id(xml: &str, id_attributes: &[String]) -> Result<String, Error> {
    let doc = fiscalsig::xml::parse(xml)?;
    doc.descendants()
        .filter(|n| n.is_element() && n.parent_element().is_some())
        .find_map(|n| {
            id_attributes
                .iter()
                .find_map(|name| n.attribute(name.as_str()))
                .map(str::to_owned)
        })
        .ok_or_else(|| Error::Validation("no element with an id attribute to sign; pass --id".into()))
}

fn cmd_verify(
    config: FiscalSigConfig,
    file: &Path,
    cert: Option<PathBuf>,
    strict: bool,
    trust_roots: Vec<PathBuf>,
    json: bool,
) -> Result<(), Error> {
    let mut config = config;
    config.trust_roots.extend(trust_roots);
    let mut validation = config.validation_config()?;
    validation.require_trusted_chain |= strict;

    let xml = read_file(file)?;
    let validator = SignatureValidator::new(validation);
    let result = match cert {
        Some(path) => {
            let certificate = CertificateInfo::from_pem(&read_bytes(&path)?)?;
            validator.validate_with_certificate(&xml, &certificate.der)
        }
        None => validator.validate(&xml),
    };

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| Error::Validation(format!("failed to serialize report: {e}")))?;
        println!("{text}");
    } else {
        print!("{result}");
    }

    if !result.is_valid {
        process::exit(1);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_c14n(
    config: &FiscalSigConfig,
    file: &Path,
    id: Option<String>,
    exclusive: bool,
    with_comments: bool,
    prefixes: Vec<String>,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let c14n = if exclusive {
        C14nConfig::exclusive().with_prefixes(prefixes)
    } else {
        C14nConfig::inclusive()
    }
    .with_comments(with_comments);

    let xml = read_file(file)?;
    let text = fiscalsig::xml::normalize_line_endings(&xml);
    let canonical = match id {
        None => fiscalsig::c14n::canonicalize_str(&text, &c14n)?,
        Some(id) => {
            let doc = fiscalsig::xml::parse(&text)?;
            let index = fiscalsig::xml::IdIndex::build(&doc, &config.signing.id_attributes);
            let node = index.resolve(&doc, &id)?;
            W3cCanonicalizer.canonicalize_node(node, &c14n, &[])?
        }
    };
    write_output(output, &canonical)
}

fn cmd_info(config: &FiscalSigConfig, cert: Option<PathBuf>) -> Result<(), Error> {
    let Some(path) = cert else {
        println!("fiscalsig: XML signatures for Brazilian fiscal documents");
        println!();
        println!("Digest algorithms:");
        println!("  SHA-1 (default), SHA-256");
        println!();
        println!("Signature algorithms:");
        println!("  RSA PKCS#1 v1.5 with SHA-1 or SHA-256");
        println!();
        println!("Canonicalization:");
        println!("  C14N 1.0, Exclusive C14N 1.0 (with and without comments)");
        println!();
        println!("Transforms:");
        println!("  enveloped-signature");
        println!();
        println!("Signature namespace: {}", ns::DSIG);
        return Ok(());
    };

    let mut chain = load_certificate_bundle_pem(&read_bytes(&path)?)?;
    if chain.is_empty() {
        return Err(Error::Certificate(format!("{}: no certificate", path.display())));
    }
    let leaf = chain.remove(0);
    println!("Subject:    {}", leaf.subject);
    println!("Issuer:     {}", leaf.issuer);
    println!("Serial:     {}", leaf.serial);
    println!("Not before: {}", fiscalsig::keys::certificate::format_time(leaf.not_before));
    println!("Not after:  {}", fiscalsig::keys::certificate::format_time(leaf.not_after));
    if let Some(id) = taxpayer_id(&leaf) {
        println!("Taxpayer:   {id} (read from the subject, not verified)");
    }

    let validation = config.validation_config()?;
    let trust = TrustValidator::new(validation.trust_anchor.clone())
        .with_clock_skew(validation.clock_skew());
    let trusted = trust.is_trusted(&leaf, Some(&chain));
    println!("Trusted:    {}", if trusted { "yes" } else { "no" });
    Ok(())
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|e| Error::Certificate(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data)
            .map_err(|e| Error::Validation(format!("{}: {e}", p.display()))),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(data)
                .map_err(|e| Error::Validation(format!("stdout: {e}")))
        }
    }
}
