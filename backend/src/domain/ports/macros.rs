//! Helper macro for declaring port error enums.
//!
//! Each variant gets a snake_case constructor accepting `impl Into<T>` for its
//! fields. Variants tagged `[transient]` after their message report
//! `is_transient() == true`; background workers use that flag to choose
//! between scheduling a retry and dead-lettering the work item.

macro_rules! define_port_error {
    (@flag transient) => {
        true
    };
    (@flag) => {
        false
    };

    (@ctor $variant:ident) => {
        ::paste::paste! {
            #[doc = concat!("Construct the `", stringify!($variant), "` variant.")]
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            #[doc = concat!("Construct the `", stringify!($variant), "` variant.")]
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };

    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:literal $([$flag:ident])?
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*

            /// Whether retrying the failed call may succeed.
            pub fn is_transient(&self) -> bool {
                match self {
                    $(
                        Self::$variant { .. } => define_port_error!(@flag $($flag)?),
                    )*
                }
            }
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use rstest::rstest;

    define_port_error! {
        pub enum ExamplePortError {
            Unreachable { message: String } => "unreachable: {message}" [transient],
            Rejected { code: u16 } => "rejected with {code}",
            Mixed { message: String, code: u16 } => "mixed: {message} ({code})",
            Closed => "channel closed" [transient],
        }
    }

    #[rstest]
    fn constructors_accept_str_for_string_fields() {
        let err = ExamplePortError::unreachable("broker down");
        assert_eq!(err.to_string(), "unreachable: broker down");
    }

    #[rstest]
    fn constructors_support_mixed_fields() {
        let err = ExamplePortError::mixed("payload", 422_u16);
        assert_eq!(err.to_string(), "mixed: payload (422)");
    }

    #[rstest]
    #[case(ExamplePortError::unreachable("x"), true)]
    #[case(ExamplePortError::rejected(400_u16), false)]
    #[case(ExamplePortError::mixed("x", 1_u16), false)]
    #[case(ExamplePortError::closed(), true)]
    fn transient_flag_follows_variant_tag(#[case] err: ExamplePortError, #[case] expected: bool) {
        assert_eq!(err.is_transient(), expected);
    }
}
