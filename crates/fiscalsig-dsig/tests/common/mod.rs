#![allow(dead_code)]

use fiscalsig_c14n::{canonicalize, C14nConfig};
use fiscalsig_core::{algorithm, ns, HashAlgorithm};
use fiscalsig_dsig::Transform;
use fiscalsig_keys::loader::{load_certificate_pem, load_rsa_private_pem};
use fiscalsig_keys::{CertificateInfo, SoftwareCertificate};
use fiscalsig_xml::{find_child_element, find_element, IdIndex, XmlWriter};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

pub const NFE_ID: &str = "NFe41190612345678000195550010000000011000000015";

pub fn nfe() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="{NFE_ID}" versao="4.00"><ide><cUF>41</cUF><natOp>VENDA &amp; REMESSA</natOp></ide><emit><CNPJ>12345678000195</CNPJ><xNome>EMPRESA TESTE LTDA</xNome></emit><det nItem="1"><prod><cProd>001</cProd><vProd>100.00</vProd></prod></det><total><ICMSTot><vNF>100.00</vNF></ICMSTot></total></infNFe></NFe>"#
    )
}

pub fn pki_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../test-data/pki")
        .join(name)
}

pub fn read_pki(name: &str) -> Vec<u8> {
    std::fs::read(pki_path(name)).unwrap()
}

pub fn provider(name: &str) -> SoftwareCertificate {
    SoftwareCertificate::from_pem(
        &read_pki(&format!("{name}.key.pem")),
        &read_pki(&format!("{name}.cert.pem")),
    )
    .unwrap()
}

pub fn certificate(name: &str) -> CertificateInfo {
    load_certificate_pem(&read_pki(&format!("{name}.cert.pem"))).unwrap()
}

/// 2015-06-01T00:00:00Z, inside the expired fixture's window.
pub fn mid_2015() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_433_116_800)
}

fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// A batch with two signed elements under a single `Signature`.
///
/// With `corrupt_second`, the second `DigestValue` is wrong but the
/// `SignatureValue` is computed over it, so only that digest fails.
pub fn two_reference_document(corrupt_second: bool) -> String {
    let body = r#"<enviNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><infA Id="A1"><v>1</v></infA><infB Id="B2"><v>2</v></infB></enviNFe>"#;
    let doc = fiscalsig_xml::parse(body).unwrap();
    let index = IdIndex::build(&doc, &ns::attr::DEFAULT_ID_ATTRS);
    let c14n = C14nConfig::inclusive();
    let digest_of = |id: &str| {
        let node = index.resolve(&doc, id).unwrap();
        b64(&fiscalsig_crypto::digest(
            HashAlgorithm::Sha1,
            &canonicalize(node, &c14n).unwrap(),
        ))
    };
    let digest_a = digest_of("A1");
    let digest_b = if corrupt_second {
        b64(&fiscalsig_crypto::digest(HashAlgorithm::Sha1, b"tampered"))
    } else {
        digest_of("B2")
    };

    let mut w = XmlWriter::new();
    w.start_element("Signature", &[("xmlns", ns::DSIG)])
        .start_element("SignedInfo", &[])
        .empty_element("CanonicalizationMethod", &[("Algorithm", algorithm::C14N)])
        .empty_element("SignatureMethod", &[("Algorithm", algorithm::RSA_SHA1)]);
    for (id, digest) in [("#A1", &digest_a), ("#B2", &digest_b)] {
        w.start_element("Reference", &[("URI", id)])
            .start_element("Transforms", &[]);
        for t in Transform::enveloped_then(c14n.clone()) {
            t.write(&mut w);
        }
        w.end_element()
            .empty_element("DigestMethod", &[("Algorithm", algorithm::SHA1)])
            .text_element("DigestValue", &[], digest)
            .end_element();
    }
    w.end_element()
        .empty_element("SignatureValue", &[])
        .start_element("KeyInfo", &[])
        .start_element("X509Data", &[])
        .text_element("X509Certificate", &[], &b64(&certificate("leaf").der));
    let signature = w.into_string();

    let close = body.len() - "</enviNFe>".len();
    let mut text = format!("{}{}{}", &body[..close], signature, &body[close..]);

    let (canonical, value_at) = {
        let doc = fiscalsig_xml::parse(&text).unwrap();
        let sig = find_element(&doc, ns::DSIG, "Signature").unwrap();
        let signed_info = find_child_element(sig, ns::DSIG, "SignedInfo").unwrap();
        let value = find_child_element(sig, ns::DSIG, "SignatureValue").unwrap();
        (
            canonicalize(signed_info, &c14n).unwrap(),
            value.range().start + "<SignatureValue>".len(),
        )
    };
    let key = load_rsa_private_pem(&read_pki("leaf.key.pem")).unwrap();
    let value = fiscalsig_crypto::sign_pkcs1v15(&key, HashAlgorithm::Sha1, &canonical).unwrap();
    text.insert_str(value_at, &b64(&value));
    text
}
