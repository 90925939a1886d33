use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Meta};

/// Derives the `ResourceSchema` trait for a type.
///
/// # Attributes
///
/// - `#[resource(type_name = "...")]`: The resource type name (required).
/// - `#[resource(schema_version = N)]`: The current schema version, a non-negative integer (required).
///
/// # Examples
///
/// ```ignore
/// use state_migrate::ResourceSchema;
///
/// #[derive(ResourceSchema)]
/// #[resource(type_name = "example_authority", schema_version = 1)]
/// pub struct CertificateAuthority;
///
/// assert_eq!(CertificateAuthority::SCHEMA_VERSION, 1);
/// ```
#[proc_macro_derive(ResourceSchema, attributes(resource))]
pub fn derive_resource_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    TokenStream::from(expand(&input))
}

fn expand(input: &DeriveInput) -> proc_macro2::TokenStream {
    let attrs = extract_attributes(input);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_name = &attrs.type_name;
    let schema_version = attrs.schema_version;

    quote! {
        impl #impl_generics state_migrate::ResourceSchema for #name #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #type_name;
            const SCHEMA_VERSION: u32 = #schema_version;
        }
    }
}

struct ResourceAttributes {
    type_name: String,
    schema_version: u32,
}

fn extract_attributes(input: &DeriveInput) -> ResourceAttributes {
    let mut type_name = None;
    let mut schema_version = None;

    for attr in &input.attrs {
        if attr.path().is_ident("resource") {
            if let Meta::List(meta_list) = &attr.meta {
                let tokens = meta_list.tokens.to_string();
                parse_resource_attrs(&tokens, &mut type_name, &mut schema_version);
            }
        }
    }

    let type_name = type_name.unwrap_or_else(|| {
        panic!("Missing #[resource(type_name = \"...\")] attribute");
    });

    if type_name.is_empty() {
        panic!("Resource type name must not be empty");
    }

    let schema_version = schema_version.unwrap_or_else(|| {
        panic!("Missing #[resource(schema_version = N)] attribute");
    });

    ResourceAttributes {
        type_name,
        schema_version,
    }
}

fn parse_resource_attrs(
    tokens: &str,
    type_name: &mut Option<String>,
    schema_version: &mut Option<u32>,
) {
    // Parse comma-separated key = value pairs
    for part in tokens.split(',') {
        let part = part.trim();

        if let Some(val) = parse_attr_value(part, "type_name") {
            *type_name = Some(val);
        } else if let Some(raw) = parse_attr_raw(part, "schema_version") {
            let version = raw.parse::<u32>().unwrap_or_else(|e| {
                panic!("Invalid schema version '{}': {}", raw, e);
            });
            *schema_version = Some(version);
        }
    }
}

fn parse_attr_raw<'a>(token: &'a str, key: &str) -> Option<&'a str> {
    let rest = token.trim().strip_prefix(key)?.trim();
    let rest = rest.strip_prefix('=')?;
    Some(rest.trim())
}

fn parse_attr_value(token: &str, key: &str) -> Option<String> {
    let rest = parse_attr_raw(token, key)?;
    if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
        return Some(rest[1..rest.len() - 1].to_string());
    }
    None
}
