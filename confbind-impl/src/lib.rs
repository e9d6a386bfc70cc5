use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod section;

#[proc_macro_derive(Section, attributes(conf))]
pub fn section_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);

    // Build the trait implementations
    section::impl_section(ast)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
