//! # Configuration Derive
//!
//! Derive macro for the small, `Copy` configuration structs of the memory
//! core: private fields, a `const` builder chain and read accessors.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate, for each **named** field `name: Ty`:
///
/// - `const fn name(&self) -> Ty` (fields must be `Copy`),
/// - `const fn with_name(mut self, value: Ty) -> Self`,
/// - `fn set_name(&mut self, value: Ty) -> &mut Self`.
///
/// Field attributes:
/// - `#[setters(skip)]` generates nothing for the field.
/// - `#[setters(no_get)]` omits the getter (e.g. when a custom one exists).
///
/// # Example
///
/// ```
/// use utils_config_derive::Setters;
///
/// #[derive(Clone, Copy, Setters)]
/// struct Limits {
///     quantum: u64,
///     #[setters(no_get)]
///     attempts: u32,
///     #[setters(skip)]
///     _reserved: (),
/// }
///
/// const L: Limits = Limits { quantum: 1, attempts: 2, _reserved: () }.with_quantum(4096);
/// let mut l = L;
/// l.set_attempts(3).set_quantum(8192);
/// assert_eq!(l.quantum(), 8192);
/// assert_eq!(l.attempts, 3);
/// ```
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_setters(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "Setters only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "Setters does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "Setters can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let opts = match FieldOptions::parse(&field.attrs) {
            Ok(opts) => opts,
            Err(e) => return e.to_compile_error().into(),
        };
        if opts.skip {
            continue;
        }

        let ty = &field.ty;
        let set_name = format_ident!("set_{}", fname);
        let with_name = format_ident!("with_{}", fname);

        if opts.getter {
            methods.push(quote! {
                #[inline]
                #[must_use]
                pub const fn #fname(&self) -> #ty {
                    self.#fname
                }
            });
        }

        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }

            #[inline]
            pub fn #set_name(&mut self, value: #ty) -> &mut Self {
                self.#fname = value;
                self
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

/// Per-field `#[setters(...)]` options.
struct FieldOptions {
    skip: bool,
    getter: bool,
}

impl FieldOptions {
    fn parse(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut opts = Self {
            skip: false,
            getter: true,
        };
        for attr in attrs {
            if !attr.path().is_ident("setters") {
                continue;
            }

            // #[setters(skip)], #[setters(skip = true)], #[setters(no_get)]
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    opts.skip = if meta.input.peek(syn::Token![=]) {
                        meta.value()?.parse::<LitBool>()?.value
                    } else {
                        true
                    };
                    Ok(())
                } else if meta.path.is_ident("no_get") {
                    opts.getter = false;
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `no_get`"))
                }
            })?;
        }
        Ok(opts)
    }
}
