// Copyright (C) 2013-2020 Blockstack PBC, a public benefit corporation
// Copyright (C) 2020-2024 Stacks Open Internet Foundation
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

/// Define a "named" enum, i.e., each variant corresponds
///  to a string literal, with a 1-1 mapping. You get EnumType::lookup_by_name
///  and EnumType.get_name_str() for free.
#[macro_export]
macro_rules! define_named_enum {
    ($(#[$meta:meta])* $Name:ident { $($Variant:ident($VarName:literal),)* }) =>
    {
        $(#[$meta])*
        #[derive(Debug, Hash, PartialEq, Eq, Copy, Clone)]
        pub enum $Name {
            $($Variant),*,
        }
        impl $Name {
            pub const ALL: &'static [$Name] = &[$($Name::$Variant),*];
            pub const ALL_NAMES: &'static [&'static str] = &[$($VarName),*];

            pub fn lookup_by_name(name: &str) -> Option<Self> {
                match name {
                    $(
                        $VarName => Some($Name::$Variant),
                    )*
                    _ => None
                }
            }

            pub fn get_name(&self) -> String {
                self.get_name_str().to_string()
            }

            pub fn get_name_str(&self) -> &'static str {
                match self {
                    $(
                        $Name::$Variant => $VarName,
                    )*
                }
            }
        }
        impl ::std::fmt::Display for $Name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.get_name_str())
            }
        }
    }
}

/// Byte accessors, hex conversion and hex formatting for a `[u8; N]`
/// newtype. The type itself derives its comparison and copy traits.
#[macro_export]
macro_rules! impl_byte_array_newtype {
    ($thing:ident, $len:expr) => {
        impl $thing {
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_bytes(inp: &[u8]) -> Option<$thing> {
                let bytes: [u8; $len] = inp.try_into().ok()?;
                Some($thing(bytes))
            }

            /// From a byte-reversed slice
            pub fn from_bytes_be(inp: &[u8]) -> Option<$thing> {
                let mut bytes: [u8; $len] = inp.try_into().ok()?;
                bytes.reverse();
                Some($thing(bytes))
            }

            pub fn from_hex(hex_str: &str) -> Result<$thing, $crate::util::HexError> {
                let bytes = $crate::util::hash::hex_bytes(hex_str)?;
                $thing::from_bytes(&bytes)
                    .ok_or($crate::util::HexError::BadLength(hex_str.len()))
            }

            pub fn to_hex(&self) -> String {
                $crate::util::hash::to_hex(&self.0)
            }
        }

        impl ::std::fmt::Debug for $thing {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl ::std::fmt::Display for $thing {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

/// Serialize as the hex string of the raw bytes.
#[macro_export]
macro_rules! impl_byte_array_serde {
    ($thing:ident) => {
        impl serde::Serialize for $thing {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $thing {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<$thing, D::Error> {
                let inst_str = <String as serde::Deserialize>::deserialize(d)?;
                $thing::from_hex(&inst_str).map_err(serde::de::Error::custom)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    define_named_enum!(Flavor {
        Plain("plain"),
        Spicy("spicy"),
    });

    #[test]
    fn named_enum_lookup() {
        assert_eq!(Flavor::lookup_by_name("spicy"), Some(Flavor::Spicy));
        assert_eq!(Flavor::lookup_by_name("sweet"), None);
        assert_eq!(Flavor::Plain.get_name_str(), "plain");
        assert_eq!(format!("{}", Flavor::Spicy), "spicy");
        assert_eq!(Flavor::ALL_NAMES, &["plain", "spicy"]);
    }

    #[derive(Clone, Copy, PartialEq)]
    struct Tag([u8; 4]);
    impl_byte_array_newtype!(Tag, 4);

    #[test]
    fn byte_array_bytes_and_hex() {
        let tag = Tag::from_hex("01020304").unwrap();
        assert_eq!(tag.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(Tag::from_bytes_be(&[4, 3, 2, 1]), Some(tag));
        assert_eq!(Tag::from_bytes(&[1, 2, 3]), None);
        assert!(Tag::from_hex("0102").is_err());
        assert_eq!(format!("{:?}", tag), "01020304");
    }
}
