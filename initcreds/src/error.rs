pub type ErrorCode = i32;

// com_err base offset of the krb5 error table.
pub const ERROR_TABLE_BASE_KRB5: ErrorCode = -1765328384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Error code reported by the KDC in a KRB-ERROR reply.
    KdcReported(ErrorCode),
    BadMsgType,
    V4Reply,
    KdcRepModified,
    KdcRepSkew,
    RealmMismatch,
    WrongRealm,
    GetInTktLoop,
    ResponseTooBig,
    NoDefaultRealm,
    EtypeNosupp,
    PreauthFailed,
    ParseMalformed,
}

macro_rules! error_table {
    ($(($error:ident, $code:expr, $message:expr),)*) => {
        impl Error {
            /// Projects onto the classic com_err number space; KDC-reported
            /// codes land at their historical offset from the table base.
            pub fn code(&self) -> ErrorCode {
                match self {
                    Self::KdcReported(code) => ERROR_TABLE_BASE_KRB5 + code,
                    $(Self::$error => $code,)*
                }
            }

            pub fn message(&self) -> &'static str {
                match self {
                    Self::KdcReported(code) => kdc_error_message(*code),
                    $(Self::$error => $message,)*
                }
            }
        }
    };
}

error_table!(
    (BadMsgType, -1765328343, "Invalid message type"),
    (
        V4Reply,
        -1765328165,
        "Initial Ticket response appears to be Version 4 error"
    ),
    (KdcRepModified, -1765328240, "KDC reply did not match expectations"),
    (KdcRepSkew, -1765328239, "Clock skew too great in KDC reply"),
    (
        RealmMismatch,
        -1765328238,
        "Client/server realm mismatch in initial ticket request"
    ),
    (WrongRealm, -1765328316, "Wrong realm"),
    (
        GetInTktLoop,
        -1765328161,
        "Looping detected inside krb5_get_in_tkt"
    ),
    (
        ResponseTooBig,
        -1765328332,
        "Response too big for UDP, retry with TCP"
    ),
    (
        NoDefaultRealm,
        -1765328160,
        "Configuration file does not specify default realm"
    ),
    (
        EtypeNosupp,
        -1765328156,
        "No supported encryption types (config file error?)"
    ),
    (PreauthFailed, -1765328174, "Generic preauthentication failure"),
    (
        ParseMalformed,
        -1765328249,
        "Malformed representation of principal"
    ),
);

fn kdc_error_message(code: ErrorCode) -> &'static str {
    match code {
        6 => "Client not found in Kerberos database",
        7 => "Server not found in Kerberos database",
        12 => "KDC policy rejects request",
        14 => "KDC has no support for encryption type",
        24 => "Preauthentication failed",
        25 => "Additional pre-authentication required",
        52 => "Response too big for UDP, retry with TCP",
        68 => "Wrong realm",
        _ => "KDC reported an error",
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {}
