//! 线上编码与名称之间的封闭映射。
//!
//! # 教案定位（Why）
//! - RFC 5246/8446 中的内容类型、协议版本、密码套件、告警与握手类型都是“编码 ↔ 名称”的闭集；
//!   以宏统一生成，保证 `code`/`from_code`/`name`/`from_name` 四个方向始终同步。
//! - 未知编码一律返回 [`WireError::InvalidValue`]，由调用方决定是否继续。
//!
//! # 实现（How）
//! - `wire_enum!` 为每个枚举生成 `ALL` 常量表与双向查找；名称缺省取变体标识符本身（IANA 名称），
//!   需要不同显示名时以 `=> "label"` 指定。

use core::fmt;

use crate::error::WireError;

macro_rules! wire_label {
    ($variant:ident) => {
        stringify!($variant)
    };
    ($variant:ident, $label:literal) => {
        $label
    };
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident($repr:ty) {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal $(=> $label:literal)?, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// 全部已知取值，按声明顺序排列。
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// 返回线上编码。
            pub const fn code(self) -> $repr {
                match self {
                    $( $name::$variant => $code, )+
                }
            }

            /// 从线上编码解析，未知编码返回 [`WireError::InvalidValue`]。
            pub fn from_code(code: $repr) -> Result<Self, WireError> {
                match code {
                    $( $code => Ok($name::$variant), )+
                    other => Err(WireError::InvalidValue {
                        field: stringify!($name),
                        value: u32::from(other),
                    }),
                }
            }

            /// 标准名称。
            pub const fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => wire_label!($variant $(, $label)?), )+
                }
            }

            /// 按名称查找，大小写不敏感。
            pub fn from_name(name: &str) -> Option<Self> {
                let name = name.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|value| value.name().eq_ignore_ascii_case(name))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

wire_enum! {
    /// 记录层内容类型。
    pub enum ContentType(u8) {
        /// change_cipher_spec
        ChangeCipherSpec = 20 => "change_cipher_spec",
        /// alert
        Alert = 21 => "alert",
        /// handshake
        Handshake = 22 => "handshake",
        /// application_data
        ApplicationData = 23 => "application_data",
    }
}

wire_enum! {
    /// 协议版本（major.minor），声明顺序即新旧顺序。
    pub enum ProtocolVersion(u16) {
        /// SSL 3.0
        Ssl3 = 0x0300 => "SSLv3",
        /// TLS 1.0
        Tls1_0 = 0x0301 => "TLSv1",
        /// TLS 1.1
        Tls1_1 = 0x0302 => "TLSv1.1",
        /// TLS 1.2
        Tls1_2 = 0x0303 => "TLSv1.2",
        /// TLS 1.3
        Tls1_3 = 0x0304 => "TLSv1.3",
    }
}

impl ProtocolVersion {
    /// 主版本号。
    pub const fn major(self) -> u8 {
        (self.code() >> 8) as u8
    }

    /// 次版本号。
    pub const fn minor(self) -> u8 {
        (self.code() & 0xff) as u8
    }
}

wire_enum! {
    /// 告警级别。
    pub enum AlertLevel(u8) {
        /// warning
        Warning = 1 => "warning",
        /// fatal
        Fatal = 2 => "fatal",
    }
}

wire_enum! {
    /// 告警描述（RFC 5246 §7.2 及 RFC 8446 §6 的补充）。
    pub enum AlertDescription(u8) {
        /// close_notify
        CloseNotify = 0 => "close_notify",
        /// unexpected_message
        UnexpectedMessage = 10 => "unexpected_message",
        /// bad_record_mac
        BadRecordMac = 20 => "bad_record_mac",
        /// decryption_failed
        DecryptionFailed = 21 => "decryption_failed",
        /// record_overflow
        RecordOverflow = 22 => "record_overflow",
        /// decompression_failure
        DecompressionFailure = 30 => "decompression_failure",
        /// handshake_failure
        HandshakeFailure = 40 => "handshake_failure",
        /// no_certificate (SSLv3)
        NoCertificate = 41 => "no_certificate",
        /// bad_certificate
        BadCertificate = 42 => "bad_certificate",
        /// unsupported_certificate
        UnsupportedCertificate = 43 => "unsupported_certificate",
        /// certificate_revoked
        CertificateRevoked = 44 => "certificate_revoked",
        /// certificate_expired
        CertificateExpired = 45 => "certificate_expired",
        /// certificate_unknown
        CertificateUnknown = 46 => "certificate_unknown",
        /// illegal_parameter
        IllegalParameter = 47 => "illegal_parameter",
        /// unknown_ca
        UnknownCa = 48 => "unknown_ca",
        /// access_denied
        AccessDenied = 49 => "access_denied",
        /// decode_error
        DecodeError = 50 => "decode_error",
        /// decrypt_error
        DecryptError = 51 => "decrypt_error",
        /// export_restriction
        ExportRestriction = 60 => "export_restriction",
        /// protocol_version
        ProtocolVersion = 70 => "protocol_version",
        /// insufficient_security
        InsufficientSecurity = 71 => "insufficient_security",
        /// internal_error
        InternalError = 80 => "internal_error",
        /// inappropriate_fallback
        InappropriateFallback = 86 => "inappropriate_fallback",
        /// user_canceled
        UserCanceled = 90 => "user_canceled",
        /// no_renegotiation
        NoRenegotiation = 100 => "no_renegotiation",
        /// missing_extension
        MissingExtension = 109 => "missing_extension",
        /// unsupported_extension
        UnsupportedExtension = 110 => "unsupported_extension",
        /// unrecognized_name
        UnrecognizedName = 112 => "unrecognized_name",
        /// bad_certificate_status_response
        BadCertificateStatusResponse = 113 => "bad_certificate_status_response",
        /// unknown_psk_identity
        UnknownPskIdentity = 115 => "unknown_psk_identity",
        /// certificate_required
        CertificateRequired = 116 => "certificate_required",
        /// no_application_protocol
        NoApplicationProtocol = 120 => "no_application_protocol",
    }
}

wire_enum! {
    /// 握手消息类型。
    pub enum HandshakeType(u8) {
        /// hello_request
        HelloRequest = 0 => "hello_request",
        /// client_hello
        ClientHello = 1 => "client_hello",
        /// server_hello
        ServerHello = 2 => "server_hello",
        /// new_session_ticket（RFC 5077）
        NewSessionTicket = 4 => "new_session_ticket",
        /// certificate
        Certificate = 11 => "certificate",
        /// server_key_exchange
        ServerKeyExchange = 12 => "server_key_exchange",
        /// certificate_request
        CertificateRequest = 13 => "certificate_request",
        /// server_hello_done
        ServerHelloDone = 14 => "server_hello_done",
        /// certificate_verify
        CertificateVerify = 15 => "certificate_verify",
        /// client_key_exchange
        ClientKeyExchange = 16 => "client_key_exchange",
        /// finished
        Finished = 20 => "finished",
    }
}

wire_enum! {
    /// 密码套件，名称即 IANA 注册名。
    #[allow(non_camel_case_types, missing_docs)]
    pub enum CipherSuite(u16) {
        TLS_NULL_WITH_NULL_NULL = 0x0000,
        TLS_RSA_WITH_NULL_MD5 = 0x0001,
        TLS_RSA_WITH_NULL_SHA = 0x0002,
        TLS_RSA_EXPORT_WITH_RC4_40_MD5 = 0x0003,
        TLS_RSA_WITH_RC4_128_MD5 = 0x0004,
        TLS_RSA_WITH_RC4_128_SHA = 0x0005,
        TLS_RSA_EXPORT_WITH_RC2_CBC_40_MD5 = 0x0006,
        TLS_RSA_WITH_IDEA_CBC_SHA = 0x0007,
        TLS_RSA_EXPORT_WITH_DES40_CBC_SHA = 0x0008,
        TLS_RSA_WITH_DES_CBC_SHA = 0x0009,
        TLS_RSA_WITH_3DES_EDE_CBC_SHA = 0x000A,
        TLS_DH_DSS_EXPORT_WITH_DES40_CBC_SHA = 0x000B,
        TLS_DH_DSS_WITH_DES_CBC_SHA = 0x000C,
        TLS_DH_DSS_WITH_3DES_EDE_CBC_SHA = 0x000D,
        TLS_DH_RSA_EXPORT_WITH_DES40_CBC_SHA = 0x000E,
        TLS_DH_RSA_WITH_DES_CBC_SHA = 0x000F,
        TLS_DH_RSA_WITH_3DES_EDE_CBC_SHA = 0x0010,
        TLS_DHE_DSS_EXPORT_WITH_DES40_CBC_SHA = 0x0011,
        TLS_DHE_DSS_WITH_DES_CBC_SHA = 0x0012,
        TLS_DHE_DSS_WITH_3DES_EDE_CBC_SHA = 0x0013,
        TLS_DHE_RSA_EXPORT_WITH_DES40_CBC_SHA = 0x0014,
        TLS_DHE_RSA_WITH_DES_CBC_SHA = 0x0015,
        TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA = 0x0016,
        TLS_DH_anon_EXPORT_WITH_RC4_40_MD5 = 0x0017,
        TLS_DH_anon_WITH_RC4_128_MD5 = 0x0018,
        TLS_DH_anon_EXPORT_WITH_DES40_CBC_SHA = 0x0019,
        TLS_DH_anon_WITH_DES_CBC_SHA = 0x001A,
        TLS_DH_anon_WITH_3DES_EDE_CBC_SHA = 0x001B,
        TLS_RSA_WITH_AES_128_CBC_SHA = 0x002F,
        TLS_DH_DSS_WITH_AES_128_CBC_SHA = 0x0030,
        TLS_DH_RSA_WITH_AES_128_CBC_SHA = 0x0031,
        TLS_DHE_DSS_WITH_AES_128_CBC_SHA = 0x0032,
        TLS_DHE_RSA_WITH_AES_128_CBC_SHA = 0x0033,
        TLS_DH_anon_WITH_AES_128_CBC_SHA = 0x0034,
        TLS_RSA_WITH_AES_256_CBC_SHA = 0x0035,
        TLS_DH_DSS_WITH_AES_256_CBC_SHA = 0x0036,
        TLS_DH_RSA_WITH_AES_256_CBC_SHA = 0x0037,
        TLS_DHE_DSS_WITH_AES_256_CBC_SHA = 0x0038,
        TLS_DHE_RSA_WITH_AES_256_CBC_SHA = 0x0039,
        TLS_DH_anon_WITH_AES_256_CBC_SHA = 0x003A,
        TLS_RSA_WITH_NULL_SHA256 = 0x003B,
        TLS_RSA_WITH_AES_128_CBC_SHA256 = 0x003C,
        TLS_RSA_WITH_AES_256_CBC_SHA256 = 0x003D,
        TLS_DHE_RSA_WITH_AES_128_CBC_SHA256 = 0x0067,
        TLS_DHE_RSA_WITH_AES_256_CBC_SHA256 = 0x006B,
        TLS_RSA_WITH_AES_128_GCM_SHA256 = 0x009C,
        TLS_RSA_WITH_AES_256_GCM_SHA384 = 0x009D,
        TLS_DHE_RSA_WITH_AES_128_GCM_SHA256 = 0x009E,
        TLS_DHE_RSA_WITH_AES_256_GCM_SHA384 = 0x009F,
        TLS_EMPTY_RENEGOTIATION_INFO_SCSV = 0x00FF,
        TLS_AES_128_GCM_SHA256 = 0x1301,
        TLS_AES_256_GCM_SHA384 = 0x1302,
        TLS_CHACHA20_POLY1305_SHA256 = 0x1303,
        TLS_AES_128_CCM_SHA256 = 0x1304,
        TLS_AES_128_CCM_8_SHA256 = 0x1305,
        TLS_FALLBACK_SCSV = 0x5600,
        TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA = 0xC009,
        TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA = 0xC00A,
        TLS_ECDHE_RSA_WITH_RC4_128_SHA = 0xC011,
        TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA = 0xC012,
        TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA = 0xC013,
        TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA = 0xC014,
        TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256 = 0xC023,
        TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384 = 0xC024,
        TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256 = 0xC027,
        TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384 = 0xC028,
        TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 = 0xC02B,
        TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 = 0xC02C,
        TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 = 0xC02F,
        TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 = 0xC030,
        TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 = 0xCCA8,
        TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256 = 0xCCA9,
        TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256 = 0xCCAA,
    }
}

impl CipherSuite {
    /// 是否为 TLS 1.3 专用套件。
    pub const fn is_tls13(self) -> bool {
        matches!(self.code(), 0x1301..=0x1305)
    }

    /// 是否为信令值（SCSV），不代表真实的加密算法组合。
    pub const fn is_signaling(self) -> bool {
        matches!(
            self,
            CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV | CipherSuite::TLS_FALLBACK_SCSV
        )
    }

    /// 出口级、空加密、匿名或基于 RC4/DES/MD5 的遗留套件，现代对端普遍拒绝。
    pub fn is_legacy(self) -> bool {
        let name = self.name();
        ["EXPORT", "NULL", "anon", "RC4", "_DES_", "DES40", "MD5", "IDEA"]
            .iter()
            .any(|marker| name.contains(marker))
    }
}

/// 返回扩展类型的标准名称；扩展类型是开放集合，未知编码返回 `None`。
pub fn extension_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0 => "server_name",
        1 => "max_fragment_length",
        5 => "status_request",
        10 => "supported_groups",
        11 => "ec_point_formats",
        13 => "signature_algorithms",
        16 => "application_layer_protocol_negotiation",
        18 => "signed_certificate_timestamp",
        21 => "padding",
        22 => "encrypt_then_mac",
        23 => "extended_master_secret",
        35 => "session_ticket",
        41 => "pre_shared_key",
        42 => "early_data",
        43 => "supported_versions",
        44 => "cookie",
        45 => "psk_key_exchange_modes",
        47 => "certificate_authorities",
        49 => "post_handshake_auth",
        50 => "signature_algorithms_cert",
        51 => "key_share",
        0xff01 => "renegotiation_info",
        _ => return None,
    };
    Some(name)
}
