extern crate proc_macro2;

use proc_macro_crate::{FoundCrate, crate_name};
use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::{Data, DeriveInput, Fields, Ident, Type, parse_macro_input, spanned::Spanned};

/// Derives `Parseable` for structs whose named fields are read back to back in declaration order.
/// Fixed-size array fields (`[T; N]`) are read element by element and need `T: Copy + Default`.
#[proc_macro_derive(Parse)]
pub fn derive_parseable(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    derive_parse_internal(input).into()
}

// separate function for testability
pub(crate) fn derive_parse_internal(input: DeriveInput) -> TokenStream {
    let crate_name = match crate_name("mdlcache-files") {
        Ok(FoundCrate::Itself) => quote!(crate),
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(#ident)
        }
        // not resolvable from the manifest (e.g. when expanding inside this crate's tests)
        Err(_) => quote!(::mdlcache_files),
    };

    let ident = input.ident;
    let fields = match input.data {
        Data::Struct(s) => match s.fields {
            Fields::Named(fields) => fields.named,
            other => {
                return syn::Error::new(
                    other.span(),
                    "`#[derive(Parse)]` only supports named struct fields at the moment",
                )
                .to_compile_error();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "`#[derive(Parse)]` is only available on structs").to_compile_error();
        }
    };

    let recurse = fields.iter().map(|f| {
        let name = &f.ident;
        let read = read_expression(&crate_name, &f.ty);
        quote_spanned! {f.span()=>
            #name: #read,
        }
    });

    quote!(
        impl #crate_name::common::reader::Parseable<#ident> for #ident {
            fn parse<R: std::io::Read>(rdr: &mut R) -> Result<#ident, #crate_name::ParserError> {
                Ok(#ident {
                    #(#recurse)*
                })
            }
        }
    )
}

fn read_expression(crate_name: &TokenStream, ty: &Type) -> TokenStream {
    match ty {
        Type::Array(array) => {
            let elem = &array.elem;
            let len = &array.len;
            let elem_read = read_expression(crate_name, elem);
            quote! {
                {
                    let mut __array: #ty = [<#elem as Default>::default(); #len];
                    for __element in __array.iter_mut() {
                        *__element = #elem_read;
                    }
                    __array
                }
            }
        }
        _ => quote! {
            <#ty as #crate_name::common::reader::Parseable<#ty>>::parse(rdr)?
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_fields_read_elementwise() {
        let input: DeriveInput = syn::parse_quote! {
            struct Header {
                version: i32,
                lods: [i32; 8],
            }
        };

        let output = derive_parse_internal(input).to_string();
        assert!(output.contains("iter_mut"));
        assert!(output.contains("Parseable < i32 >"));
    }

    #[test]
    fn tuple_structs_are_rejected() {
        let input: DeriveInput = syn::parse_quote! {
            struct Pair(i32, i32);
        };

        let output = derive_parse_internal(input).to_string();
        assert!(output.contains("compile_error"));
    }
}
