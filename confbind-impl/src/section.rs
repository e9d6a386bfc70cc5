use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DataStruct, DeriveInput, Fields, Ident, LitStr};

#[derive(Default)]
struct FieldAttrs {
    format: Option<LitStr>,
    hook: Option<LitStr>,
    init: Option<LitStr>,
    skip: bool,
}

fn field_attrs(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
    let mut fa = FieldAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("conf")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("format") {
                fa.format = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("hook") {
                fa.hook = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("init") {
                fa.init = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("skip") {
                fa.skip = true;
            } else {
                return Err(meta.error("unknown conf attribute"));
            }
            Ok(())
        })?;
    }
    Ok(fa)
}

#[derive(Default)]
struct StructAttrs {
    callbacks: bool,
    default: bool,
}

fn struct_attrs(attrs: &[syn::Attribute]) -> syn::Result<StructAttrs> {
    let mut sa = StructAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("conf")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("callbacks") {
                sa.callbacks = true;
            } else if meta.path.is_ident("default") {
                sa.default = true;
            } else {
                return Err(meta.error("unknown conf attribute"));
            }
            Ok(())
        })?;
    }
    Ok(sa)
}

// `max_size` -> `MaxSize`.
fn camelize(ident: &Ident) -> String {
    let name = ident.to_string();
    let name = name.trim_start_matches("r#");
    name.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn opt(lit: &Option<LitStr>) -> TokenStream {
    match lit {
        Some(lit) => quote!(::std::option::Option::Some(#lit)),
        None => quote!(::std::option::Option::None),
    }
}

pub fn impl_section(ast: DeriveInput) -> syn::Result<TokenStream> {
    let fields = match &ast.data {
        Data::Struct(DataStruct { fields: Fields::Named(fields), .. }) => &fields.named,
        _ => {
            return Err(syn::Error::new_spanned(
                &ast.ident,
                "Section can only be derived for structs with named fields",
            ))
        }
    };
    let st_attrs = struct_attrs(&ast.attrs)?;

    let st_name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let mut lookup = Vec::new();
    let mut all = Vec::new();
    let mut factories = Vec::new();
    let mut fresh = Vec::new();

    for f in fields {
        let attrs = field_attrs(&f.attrs)?;
        let ident = f.ident.as_ref().expect("named field");
        let ty = &f.ty;
        if attrs.skip {
            fresh.push(quote!(#ident: ::std::default::Default::default()));
            continue;
        }
        fresh.push(quote!(#ident: <#ty as ::confbind::Target>::fresh()));
        let name = camelize(ident);
        let format = opt(&attrs.format);
        let hook = opt(&attrs.hook);
        let init = opt(&attrs.init);

        let field = quote! {
            ::confbind::Field {
                target: &mut self.#ident,
                meta: {
                    static META: ::confbind::FieldMeta = ::confbind::FieldMeta {
                        name: #name,
                        format: #format,
                        hook: #hook,
                        init: #init,
                    };
                    &META
                },
            }
        };
        lookup.push(quote! {
            #name => ::std::option::Option::Some(#field),
        });
        all.push(field);

        if let Some(factory) = &attrs.init {
            let method: Ident = factory.parse()?;
            factories.push(quote! {
                self.#ident = self.#method();
            });
        }
    }

    let fresh = if st_attrs.default {
        quote!(<Self as ::std::default::Default>::default())
    } else {
        quote!(Self { #(#fresh),* })
    };

    let delegate = if st_attrs.callbacks {
        quote! {
            fn init(&mut self) -> ::std::option::Option<::std::result::Result<(), ::std::string::String>> {
                <Self as ::confbind::Callbacks>::init(self)
            }

            fn format(&self, name: &str, text: &str) -> ::std::option::Option<::confbind::Converted> {
                <Self as ::confbind::Callbacks>::format(self, name, text)
            }

            fn hook(&self, name: &str, text: &str) -> ::std::option::Option<::std::result::Result<(), ::std::string::String>> {
                <Self as ::confbind::Callbacks>::hook(self, name, text)
            }
        }
    } else {
        quote!()
    };

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::confbind::Target for #st_name #ty_generics #where_clause {
            fn fresh() -> Self {
                #fresh
            }
            fn kind(&self) -> ::confbind::Kind {
                ::confbind::Kind::Struct
            }
            fn slot(&mut self) -> ::confbind::Slot<'_> {
                ::confbind::Slot::Struct(self)
            }
        }

        #[automatically_derived]
        impl #impl_generics ::confbind::Section for #st_name #ty_generics #where_clause {
            fn type_name(&self) -> &'static str {
                stringify!(#st_name)
            }

            fn field(&mut self, name: &str) -> ::std::option::Option<::confbind::Field<'_>> {
                match name {
                    #(#lookup)*
                    _ => ::std::option::Option::None,
                }
            }

            fn fields(&mut self) -> ::std::vec::Vec<::confbind::Field<'_>> {
                ::std::vec![#(#all),*]
            }

            fn init_fields(&mut self) {
                #(#factories)*
            }

            #delegate
        }
    })
}
