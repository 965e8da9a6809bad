use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, GenericArgument, ItemFn, PathArguments, ReturnType, Type};

/// Turns a plain function into a task constructor.
///
/// ```rust,ignore
/// #[tandem::task]
/// fn stock(product: String) -> Result<u64, WorkError> { ... }
///
/// let promise = executor.submit(stock("iPad".into()));
/// ```
///
/// The body does not run when the function is called; it runs on whichever
/// worker picks the task up. A `Result<T, E>` return type becomes a task with
/// output `T` whose failures are converted with `Into<WorkError>`; any other
/// return type becomes an infallible task.
#[proc_macro_attribute]
pub fn task(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = proc_macro2::TokenStream::from(attr);
        return syn::Error::new_spanned(attr, "#[task] takes no arguments")
            .to_compile_error()
            .into();
    }

    let input_fn = parse_macro_input!(item as ItemFn);

    if let Some(asyncness) = &input_fn.sig.asyncness {
        return syn::Error::new_spanned(asyncness, "#[task] functions run on worker threads and cannot be async")
            .to_compile_error()
            .into();
    }

    let fn_attrs = &input_fn.attrs;
    let fn_vis = &input_fn.vis;
    let fn_name = &input_fn.sig.ident;
    let fn_generics = &input_fn.sig.generics;
    let fn_where = &input_fn.sig.generics.where_clause;
    let fn_inputs = &input_fn.sig.inputs;
    let fn_body = &input_fn.block;

    let return_type = match &input_fn.sig.output {
        ReturnType::Type(_, ty) => quote! { #ty },
        ReturnType::Default => quote! { () },
    };

    let value_type = match result_value_type(&input_fn.sig.output) {
        Ok(value_type) => value_type,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = match value_type {
        Some(value_type) => quote! {
            #(#fn_attrs)*
            #fn_vis fn #fn_name #fn_generics (#fn_inputs) -> impl ::tandem::runtime::Task<Output = #value_type> #fn_where {
                ::tandem::runtime::TaskWrapper::new(move || {
                    let result: #return_type = (move || -> #return_type #fn_body)();
                    result.map_err(::core::convert::Into::<::tandem::runtime::WorkError>::into)
                })
            }
        },
        None => quote! {
            #(#fn_attrs)*
            #fn_vis fn #fn_name #fn_generics (#fn_inputs) -> impl ::tandem::runtime::Task<Output = #return_type> #fn_where {
                ::tandem::runtime::TaskWrapper::new(move || {
                    let value: #return_type = (move || -> #return_type #fn_body)();
                    ::core::result::Result::Ok::<_, ::tandem::runtime::WorkError>(value)
                })
            }
        },
    };

    TokenStream::from(expanded)
}

// `Result<T, E>` -> `Some(T)`, any non-`Result` type -> `None`.
// Single-argument aliases such as `io::Result<T>` hide the error type, so
// they are rejected instead of being taken for an infallible value.
fn result_value_type(output: &ReturnType) -> syn::Result<Option<&Type>> {
    let ReturnType::Type(_, ty) = output else {
        return Ok(None);
    };
    let Type::Path(path) = ty.as_ref() else {
        return Ok(None);
    };
    let Some(segment) = path.path.segments.last() else {
        return Ok(None);
    };
    if segment.ident != "Result" {
        return Ok(None);
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Ok(None);
    };
    if args.args.len() != 2 {
        return Err(syn::Error::new_spanned(
            ty,
            "#[task] needs the error type spelled out: write `Result<T, E>` instead of a `Result` alias",
        ));
    }
    match args.args.first() {
        Some(GenericArgument::Type(value)) => Ok(Some(value)),
        _ => Ok(None),
    }
}
