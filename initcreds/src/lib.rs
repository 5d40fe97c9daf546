mod codec;
mod context;
mod credential;
mod credential_cache;
mod crypto;
mod error;
mod fast;
mod get_in_tkt;
mod init_creds;
mod krb;
mod message;
mod options;
mod preauth;
mod principal;
mod prompter;
mod ticket;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use self::{
    codec::Codec,
    context::{conf_boolean, Conf, Context, Profile},
    credential::{Address, AuthData, Credential, TicketTimes},
    credential_cache::{CredentialCache, MemoryCache},
    crypto::{Crypto, Enctype, Keyblock},
    error::{Error, ErrorCode, ERROR_TABLE_BASE_KRB5},
    fast::{FastArmor, FastState},
    get_in_tkt::{get_in_tkt, saturating_add_i32},
    init_creds::{get_init_creds, InitCredsContext, INIT_CREDS_STEP_FLAG_COMPLETE},
    krb::{string_to_deltat, StrConv},
    message::{EncKdcReplyPart, EtypeInfo2, KdcReply, KdcRequest, KrbError},
    options::GetInitCredsOpt,
    preauth::{
        make_preauth_list, sort_padata_sequence, PaData, PaType, PreauthContext, PreauthMethod,
        PreauthRequest, PreauthState,
    },
    principal::{NameType, Principal},
    prompter::{KeySource, PasswordKeySource, Prompt, Prompter},
    ticket::{EncData, Kvno, Ticket},
    transport::Transport,
};

pub type Flags = i32;
pub type Timestamp = i32;
pub type DeltaT = i32;
