#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N).
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//!
//! Only visibly utilized namespaces are rendered: the prefix of the element
//! name, the prefixes of its attributes, and any prefix named in the
//! `InclusiveNamespaces` PrefixList (`#default` for the default namespace).
//! `xml:*` attributes are not inherited.

use crate::context::{default_namespace_decl, NamespaceMap};
use crate::render::NsDecl;
use std::collections::BTreeSet;

pub(crate) fn namespace_decls(
    in_scope: &NamespaceMap,
    rendered: &NamespaceMap,
    utilized: &BTreeSet<&str>,
    inclusive_prefixes: &[String],
) -> Vec<NsDecl> {
    let listed = inclusive_prefixes
        .iter()
        .map(|p| if p == "#default" { "" } else { p.as_str() });
    let prefixes: BTreeSet<&str> = utilized.iter().copied().chain(listed).collect();

    let mut decls = Vec::new();
    for prefix in prefixes {
        if prefix == "xml" {
            continue;
        }
        if prefix.is_empty() {
            decls.extend(default_namespace_decl(in_scope, rendered));
        } else if let Some(uri) = in_scope.get(prefix) {
            if rendered.get(prefix) != Some(uri) {
                decls.push(NsDecl::new(prefix, uri));
            }
        }
    }
    decls.sort();
    decls
}

#[cfg(test)]
mod tests {
    use crate::{canonicalize, C14nConfig};

    fn subtree(xml: &str, name: &str, config: &C14nConfig) -> String {
        let doc = fiscalsig_xml::parse(xml).unwrap();
        let node = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == name)
            .unwrap();
        String::from_utf8(canonicalize(node, config).unwrap()).unwrap()
    }

    #[test]
    fn only_utilized_namespaces() {
        let xml = r#"<NFe xmlns="urn:nfe" xmlns:xsi="urn:xsi"><infNFe Id="N1"><ide/></infNFe></NFe>"#;
        assert_eq!(
            subtree(xml, "infNFe", &C14nConfig::exclusive()),
            r#"<infNFe xmlns="urn:nfe" Id="N1"><ide></ide></infNFe>"#
        );
    }

    #[test]
    fn attribute_prefixes_are_utilized() {
        let xml = r#"<r xmlns:p="urn:p" xmlns:q="urn:q" xmlns:u="urn:u"><p:a q:x="1"><c/></p:a></r>"#;
        assert_eq!(
            subtree(xml, "a", &C14nConfig::exclusive()),
            r#"<p:a xmlns:p="urn:p" xmlns:q="urn:q" q:x="1"><c></c></p:a>"#
        );
    }

    #[test]
    fn default_namespace_pushed_down() {
        let xml = r#"<p:a xmlns:p="urn:p" xmlns="urn:d"><b/></p:a>"#;
        assert_eq!(
            subtree(xml, "a", &C14nConfig::exclusive()),
            r#"<p:a xmlns:p="urn:p"><b xmlns="urn:d"></b></p:a>"#
        );
    }

    #[test]
    fn prefix_list_forces_declarations() {
        let xml = r#"<r xmlns:p="urn:p" xmlns:u="urn:u"><a/></r>"#;
        assert_eq!(subtree(xml, "a", &C14nConfig::exclusive()), "<a></a>");
        let listed = C14nConfig::exclusive().with_prefixes(vec!["u".into(), "missing".into()]);
        assert_eq!(subtree(xml, "a", &listed), r#"<a xmlns:u="urn:u"></a>"#);
        assert_eq!(
            subtree(xml, "a", &C14nConfig::inclusive()),
            r#"<a xmlns:p="urn:p" xmlns:u="urn:u"></a>"#
        );
    }

    #[test]
    fn no_xml_attribute_inheritance() {
        let xml = r#"<r xml:lang="pt"><a/></r>"#;
        assert_eq!(subtree(xml, "a", &C14nConfig::exclusive()), "<a></a>");
    }
}
